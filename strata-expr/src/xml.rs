//! XML wire grammar for expressions.
//!
//! A serialized query is a versioned document with a single root
//! expression node:
//!
//! ```xml
//! <query version="1">
//!   <node kind="EXPR" name="AND">
//!     <node kind="EXPR" name="EQU">
//!       <node kind="FIELD" name="Category"/>
//!       <node kind="CONST" type="I64" value="10"/>
//!     </node>
//!   </node>
//! </query>
//! ```
//!
//! Serialization round-trips losslessly for all constructible trees.
//! Unknown node kinds, operator names and constant types deserialize
//! into error nodes rather than failing, so newer peers can send
//! extended grammars to older ones; only malformed documents are
//! rejected outright.

use crate::node::{Expr, OpCode};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use strata_types::{CoreError, CoreResult, Value};

const QUERY_VERSION: &str = "1";

fn xml_err(err: impl std::fmt::Display) -> CoreError {
    CoreError::Serialization(format!("query xml: {err}"))
}

/// Serializes an expression tree to the versioned XML form.
pub fn serialize(expr: &Expr) -> CoreResult<String> {
    let mut writer = Writer::new(Vec::new());
    let mut root = BytesStart::new("query");
    root.push_attribute(("version", QUERY_VERSION));
    writer.write_event(Event::Start(root)).map_err(xml_err)?;
    write_node(&mut writer, expr)?;
    writer
        .write_event(Event::End(BytesEnd::new("query")))
        .map_err(xml_err)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn write_node(writer: &mut Writer<Vec<u8>>, expr: &Expr) -> CoreResult<()> {
    match expr {
        Expr::Const(value) => {
            let type_name = value.type_name();
            let value_text = value.to_text();
            let mut elem = BytesStart::new("node");
            elem.push_attribute(("kind", "CONST"));
            elem.push_attribute(("type", type_name.as_str()));
            elem.push_attribute(("value", value_text.as_str()));
            writer.write_event(Event::Empty(elem)).map_err(xml_err)
        }
        Expr::Field(name) => {
            let mut elem = BytesStart::new("node");
            elem.push_attribute(("kind", "FIELD"));
            elem.push_attribute(("name", name.as_str()));
            writer.write_event(Event::Empty(elem)).map_err(xml_err)
        }
        Expr::Error(message) => {
            let mut elem = BytesStart::new("node");
            elem.push_attribute(("kind", "ERROR"));
            elem.push_attribute(("value", message.as_str()));
            writer.write_event(Event::Empty(elem)).map_err(xml_err)
        }
        Expr::Op(op, args) => {
            let mut elem = BytesStart::new("node");
            elem.push_attribute(("kind", "EXPR"));
            elem.push_attribute(("name", op.wire_name()));
            if args.is_empty() {
                writer.write_event(Event::Empty(elem)).map_err(xml_err)
            } else {
                writer.write_event(Event::Start(elem)).map_err(xml_err)?;
                for arg in args {
                    write_node(writer, arg)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new("node")))
                    .map_err(xml_err)
            }
        }
    }
}

// Attributes gathered from one <node> element before its children are
// known.
struct PendingNode {
    kind: String,
    name: Option<String>,
    type_name: Option<String>,
    value: Option<String>,
    children: Vec<Expr>,
}

impl PendingNode {
    fn from_element(elem: &BytesStart<'_>) -> CoreResult<Self> {
        Ok(Self {
            kind: attribute(elem, "kind")?
                .ok_or_else(|| xml_err("node element without kind attribute"))?,
            name: attribute(elem, "name")?,
            type_name: attribute(elem, "type")?,
            value: attribute(elem, "value")?,
            children: Vec::new(),
        })
    }

    fn build(self) -> Expr {
        match self.kind.to_ascii_uppercase().as_str() {
            "CONST" => {
                let type_name = self.type_name.unwrap_or_default();
                let value_text = self.value.unwrap_or_default();
                match Value::parse_typed(&type_name, &value_text) {
                    Ok(value) => Expr::Const(value),
                    Err(err) => Expr::Error(err.to_string()),
                }
            }
            "FIELD" => match self.name {
                Some(name) if !name.is_empty() => Expr::Field(name),
                _ => Expr::Error("field node without name".into()),
            },
            "EXPR" => {
                let name = self.name.unwrap_or_default();
                match OpCode::from_wire_name(&name) {
                    Some(op) => Expr::Op(op, self.children),
                    None => Expr::Error(format!("unknown operator '{name}'")),
                }
            }
            "ERROR" => Expr::Error(self.value.unwrap_or_default()),
            other => Expr::Error(format!("unknown node kind '{other}'")),
        }
    }
}

fn attribute(elem: &BytesStart<'_>, name: &str) -> CoreResult<Option<String>> {
    match elem.try_get_attribute(name) {
        Ok(Some(attr)) => Ok(Some(attr.unescape_value().map_err(xml_err)?.into_owned())),
        Ok(None) => Ok(None),
        Err(err) => Err(xml_err(err)),
    }
}

/// Deserializes an expression tree from the versioned XML form.
pub fn deserialize(text: &str) -> CoreResult<Expr> {
    let mut reader = Reader::from_str(text);

    let mut saw_root = false;
    let mut finished = false;
    let mut root_expr: Option<Expr> = None;
    let mut stack: Vec<PendingNode> = Vec::new();

    fn attach(
        expr: Expr,
        stack: &mut [PendingNode],
        root_expr: &mut Option<Expr>,
    ) -> CoreResult<()> {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(expr);
            return Ok(());
        }
        if root_expr.is_some() {
            return Err(xml_err("query has more than one root expression"));
        }
        *root_expr = Some(expr);
        Ok(())
    }

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) => {}
            Event::Start(elem) if elem.name().as_ref() == b"query" => {
                if saw_root {
                    return Err(xml_err("nested query element"));
                }
                let version = attribute(&elem, "version")?
                    .ok_or_else(|| xml_err("query element without version"))?;
                if version != QUERY_VERSION {
                    return Err(xml_err(format!("unsupported query version: {version}")));
                }
                saw_root = true;
            }
            Event::Start(elem) if elem.name().as_ref() == b"node" => {
                if !saw_root {
                    return Err(xml_err("node element outside query"));
                }
                stack.push(PendingNode::from_element(&elem)?);
            }
            Event::Empty(elem) if elem.name().as_ref() == b"node" => {
                if !saw_root {
                    return Err(xml_err("node element outside query"));
                }
                let node = PendingNode::from_element(&elem)?;
                attach(node.build(), &mut stack, &mut root_expr)?;
            }
            Event::End(elem) if elem.name().as_ref() == b"node" => {
                let node = stack
                    .pop()
                    .ok_or_else(|| xml_err("unbalanced node element"))?;
                attach(node.build(), &mut stack, &mut root_expr)?;
            }
            Event::End(elem) if elem.name().as_ref() == b"query" => {
                finished = true;
                break;
            }
            Event::Eof => break,
            other => {
                return Err(xml_err(format!("unexpected content: {other:?}")));
            }
        }
    }

    if !finished {
        return Err(xml_err("unexpected end of document"));
    }
    root_expr.ok_or_else(|| xml_err("query contains no expression"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_a_representative_tree() {
        let expr = Expr::and([
            Expr::field_eq("Category", 10),
            Expr::field_starts_with("Region", "EM"),
            Expr::field_is_not_null("Owner"),
            Expr::or([
                Expr::field_eq("Live", true),
                Expr::is_le(Expr::prop("$ItemExpires"), Expr::func_now()),
            ]),
        ]);
        let text = serialize(&expr).unwrap();
        let parsed = deserialize(&text).unwrap();
        assert_eq!(parsed, expr);
        assert!(!parsed.has_errors());
    }

    #[test]
    fn round_trips_nullary_functions() {
        let expr = Expr::is_ge(Expr::func_today(), Expr::func_now());
        let parsed = deserialize(&serialize(&expr).unwrap()).unwrap();
        assert_eq!(parsed, expr);
    }

    #[test]
    fn unknown_operator_becomes_an_error_node() {
        let text = r#"<query version="1"><node kind="EXPR" name="FROBNICATE"><node kind="CONST" type="I64" value="1"/></node></query>"#;
        let parsed = deserialize(text).unwrap();
        assert!(parsed.has_errors());
    }

    #[test]
    fn unknown_kind_becomes_an_error_node() {
        let text = r#"<query version="1"><node kind="LAMBDA" name="x"/></query>"#;
        let parsed = deserialize(text).unwrap();
        assert!(parsed.has_errors());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let text = r#"<query version="2"><node kind="CONST" type="Bool" value="true"/></query>"#;
        assert!(deserialize(text).is_err());
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(deserialize("<query version=\"1\">").is_err());
        assert!(deserialize("not xml at all").is_err());
        assert!(deserialize(r#"<query version="1"></query>"#).is_err());
    }

    #[test]
    fn escaped_string_constants_survive() {
        let expr = Expr::field_eq("Note", "a < b & \"c\" | 100%");
        let parsed = deserialize(&serialize(&expr).unwrap()).unwrap();
        assert_eq!(parsed, expr);
    }
}
