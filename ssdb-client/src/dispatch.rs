//! # Response Dispatch
//!
//! Purpose: Turn a decoded response into the value shape a command's caller
//! expects, keyed by command name.
//!
//! ## Design Principles
//! 1. **Owned Table**: Each client owns its `ResponseCallbacks`; overrides
//!    never leak into other clients.
//! 2. **Tagged Rules**: Built-in shapes are enum variants; only caller
//!    overrides need a closure.
//! 3. **Status First**: `not_found` is an absent value and error statuses
//!    become `ResponseError` before any reshape runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ssdb_common::{Field, Response, Status};

use crate::error::{Error, ResponseError, Result};

/// Caller-supplied reshape function.
pub type ReshapeFn = Arc<dyn Fn(Vec<Field>) -> Result<Reply> + Send + Sync>;

/// Decoded value handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The server answered `not_found`.
    Absent,
    /// A single field, passed through.
    Value(Field),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Payload fields in server order.
    List(Vec<Field>),
    /// Alternating key/value fields, in server order.
    Map(Vec<(Field, Field)>),
    /// Alternating key/integer fields, in server order.
    IntMap(Vec<(Field, i64)>),
    /// Alternating key/value fields without ordering.
    HashMap(HashMap<Field, Field>),
}

impl Reply {
    pub fn is_absent(&self) -> bool {
        matches!(self, Reply::Absent)
    }

    pub fn into_value(self) -> Option<Field> {
        match self {
            Reply::Value(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Field>> {
        match self {
            Reply::List(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<Vec<(Field, Field)>> {
        match self {
            Reply::Map(pairs) => Some(pairs),
            _ => None,
        }
    }
}

/// How the payload of an `ok` response is reshaped.
#[derive(Clone)]
pub enum Reshape {
    /// Payload fields unchanged.
    Raw,
    /// First field only.
    First,
    Int,
    Float,
    /// First field parsed as an integer, non-zero is `true`.
    Bool,
    /// Always `true`; for commands whose `ok` carries no useful payload.
    True,
    OrderedMap,
    IntMap,
    UnorderedMap,
    Custom(ReshapeFn),
}

impl Reshape {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Vec<Field>) -> Result<Reply> + Send + Sync + 'static,
    {
        Reshape::Custom(Arc::new(f))
    }

    /// Applies the rule to the payload of an `ok` response.
    pub fn apply(&self, fields: Vec<Field>) -> Result<Reply> {
        match self {
            Reshape::Raw => Ok(Reply::List(fields)),
            Reshape::First => first(fields).map(Reply::Value),
            Reshape::Int => parse_int(&first(fields)?).map(Reply::Int),
            Reshape::Float => parse_float(&first(fields)?).map(Reply::Float),
            Reshape::Bool => parse_int(&first(fields)?).map(|v| Reply::Bool(v != 0)),
            Reshape::True => Ok(Reply::Bool(true)),
            Reshape::OrderedMap => pairs(fields).map(Reply::Map),
            Reshape::IntMap => pairs(fields)?
                .into_iter()
                .map(|(key, value)| parse_int(&value).map(|v| (key, v)))
                .collect::<Result<Vec<_>>>()
                .map(Reply::IntMap),
            Reshape::UnorderedMap => pairs(fields).map(|p| Reply::HashMap(p.into_iter().collect())),
            Reshape::Custom(f) => f(fields),
        }
    }
}

impl fmt::Debug for Reshape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reshape::Raw => "Raw",
            Reshape::First => "First",
            Reshape::Int => "Int",
            Reshape::Float => "Float",
            Reshape::Bool => "Bool",
            Reshape::True => "True",
            Reshape::OrderedMap => "OrderedMap",
            Reshape::IntMap => "IntMap",
            Reshape::UnorderedMap => "UnorderedMap",
            Reshape::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Command name to reshape rule, owned per client.
#[derive(Debug, Clone)]
pub struct ResponseCallbacks {
    table: HashMap<String, Reshape>,
}

const BOOL_COMMANDS: &str =
    "set del exists hset hdel hclear hexists zset zdel zclear zexists";
const FIRST_COMMANDS: &str = "get hget";
const INT_COMMANDS: &str = "incr decr multi_set multi_del \
    hincr hdecr hsize multi_hset multi_hdel \
    zincr zdecr zsize multi_zset multi_zdel zget zrank zrrank";
const MAP_COMMANDS: &str = "multi_get scan rscan multi_hget hscan hrscan";
const INT_MAP_COMMANDS: &str = "multi_zget zscan zrscan zrange zrrange";
const LIST_COMMANDS: &str = "keys hkeys hlist zkeys zlist";

impl Default for ResponseCallbacks {
    fn default() -> Self {
        let mut callbacks = ResponseCallbacks::empty();
        let groups = [
            (BOOL_COMMANDS, Reshape::Bool),
            (FIRST_COMMANDS, Reshape::First),
            (INT_COMMANDS, Reshape::Int),
            (MAP_COMMANDS, Reshape::OrderedMap),
            (INT_MAP_COMMANDS, Reshape::IntMap),
            (LIST_COMMANDS, Reshape::Raw),
        ];
        for (names, reshape) in groups {
            for name in names.split_whitespace() {
                callbacks.set(name, reshape.clone());
            }
        }
        callbacks.set("setx", Reshape::True);
        callbacks
    }
}

impl ResponseCallbacks {
    /// A table with no registered commands; everything reshapes as `Raw`.
    pub fn empty() -> Self {
        ResponseCallbacks {
            table: HashMap::new(),
        }
    }

    /// Registers or replaces the rule for `command`. Names are case-sensitive.
    pub fn set(&mut self, command: impl Into<String>, reshape: Reshape) {
        self.table.insert(command.into(), reshape);
    }

    pub fn get(&self, command: &str) -> Option<&Reshape> {
        self.table.get(command)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Maps a response to the caller's value.
    ///
    /// `override_with` takes precedence over the table entry for this call.
    pub fn dispatch(
        &self,
        command: &str,
        response: Response,
        override_with: Option<&Reshape>,
    ) -> Result<Reply> {
        match response.status {
            Status::Ok => {
                let reshape = override_with.or_else(|| self.get(command));
                match reshape {
                    Some(reshape) => reshape.apply(response.fields),
                    None => Ok(Reply::List(response.fields)),
                }
            }
            Status::NotFound => Ok(Reply::Absent),
            status => Err(ResponseError::new(status, response.fields).into()),
        }
    }
}

fn first(fields: Vec<Field>) -> Result<Field> {
    fields
        .into_iter()
        .next()
        .ok_or_else(|| Error::Data("expected at least one field, got none".to_string()))
}

fn parse_int(field: &Field) -> Result<i64> {
    field
        .as_str()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::Data(format!("expected an integer, got '{}'", field)))
}

fn parse_float(field: &Field) -> Result<f64> {
    field
        .as_str()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .ok_or_else(|| Error::Data(format!("expected a float, got '{}'", field)))
}

fn pairs(fields: Vec<Field>) -> Result<Vec<(Field, Field)>> {
    if fields.len() % 2 != 0 {
        return Err(Error::Data(format!(
            "expected key/value pairs, got {} fields",
            fields.len()
        )));
    }
    let mut out = Vec::with_capacity(fields.len() / 2);
    let mut iter = fields.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        out.push((key, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(fields: &[&str]) -> Response {
        Response {
            status: Status::Ok,
            fields: fields.iter().map(|f| Field::from(*f)).collect(),
        }
    }

    #[test]
    fn not_found_is_absent_regardless_of_payload() {
        let callbacks = ResponseCallbacks::default();
        let response = Response {
            status: Status::NotFound,
            fields: vec![Field::from("ignored")],
        };
        assert_eq!(callbacks.dispatch("get", response, None).unwrap(), Reply::Absent);
    }

    #[test]
    fn ok_without_payload_is_empty_list() {
        let callbacks = ResponseCallbacks::default();
        let reply = callbacks.dispatch("unregistered", ok(&[]), None).unwrap();
        assert_eq!(reply, Reply::List(Vec::new()));
    }

    #[test]
    fn error_statuses_become_response_errors() {
        let callbacks = ResponseCallbacks::default();
        for status in [Status::Error, Status::Fail, Status::ClientError] {
            let response = Response {
                status,
                fields: vec![Field::from("boom")],
            };
            match callbacks.dispatch("set", response, None) {
                Err(Error::Response(err)) => {
                    assert_eq!(err.status, status);
                    assert_eq!(err.message(), status.message());
                    assert_eq!(err.payload, vec![Field::from("boom")]);
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn default_table_shapes() {
        let callbacks = ResponseCallbacks::default();
        assert_eq!(callbacks.dispatch("set", ok(&["1"]), None).unwrap(), Reply::Bool(true));
        assert_eq!(callbacks.dispatch("del", ok(&["0"]), None).unwrap(), Reply::Bool(false));
        assert_eq!(callbacks.dispatch("incr", ok(&["42"]), None).unwrap(), Reply::Int(42));
        assert_eq!(
            callbacks.dispatch("get", ok(&["v"]), None).unwrap(),
            Reply::Value(Field::from("v"))
        );
        assert_eq!(
            callbacks.dispatch("multi_get", ok(&["a", "1", "b", "2"]), None).unwrap(),
            Reply::Map(vec![
                (Field::from("a"), Field::from("1")),
                (Field::from("b"), Field::from("2")),
            ])
        );
        assert_eq!(
            callbacks.dispatch("zscan", ok(&["a", "10", "b", "-2"]), None).unwrap(),
            Reply::IntMap(vec![(Field::from("a"), 10), (Field::from("b"), -2)])
        );
        assert_eq!(
            callbacks.dispatch("keys", ok(&["a", "b"]), None).unwrap(),
            Reply::List(vec![Field::from("a"), Field::from("b")])
        );
        assert_eq!(callbacks.dispatch("setx", ok(&["1"]), None).unwrap(), Reply::Bool(true));
    }

    #[test]
    fn override_beats_table() {
        let mut callbacks = ResponseCallbacks::default();
        callbacks.set("get", Reshape::Int);
        assert_eq!(callbacks.dispatch("get", ok(&["7"]), None).unwrap(), Reply::Int(7));
        assert_eq!(
            callbacks.dispatch("get", ok(&["7"]), Some(&Reshape::Float)).unwrap(),
            Reply::Float(7.0)
        );
        let upper = Reshape::custom(|fields| {
            Ok(Reply::Value(Field::Text(fields[0].to_text_lossy().to_uppercase())))
        });
        assert_eq!(
            callbacks.dispatch("get", ok(&["abc"]), Some(&upper)).unwrap(),
            Reply::Value(Field::from("ABC"))
        );
    }

    #[test]
    fn names_are_case_sensitive() {
        let callbacks = ResponseCallbacks::default();
        assert!(callbacks.get("GET").is_none());
        assert_eq!(
            callbacks.dispatch("GET", ok(&["v"]), None).unwrap(),
            Reply::List(vec![Field::from("v")])
        );
    }

    #[test]
    fn odd_map_payload_is_data_error() {
        let callbacks = ResponseCallbacks::default();
        let err = callbacks.dispatch("scan", ok(&["a", "1", "b"]), None).unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn accessors_follow_variant() {
        assert_eq!(Reply::Value(Field::from("v")).into_value(), Some(Field::from("v")));
        assert_eq!(Reply::Absent.into_value(), None);
        assert_eq!(Reply::Int(3).as_int(), Some(3));
        assert_eq!(Reply::Bool(true).as_int(), None);
        assert_eq!(Reply::Bool(false).as_bool(), Some(false));
        assert_eq!(
            Reply::List(vec![Field::from("a")]).into_list(),
            Some(vec![Field::from("a")])
        );
        assert_eq!(Reply::List(Vec::new()).into_map(), None);
        assert_eq!(
            Reply::Map(vec![(Field::from("k"), Field::from("v"))]).into_map(),
            Some(vec![(Field::from("k"), Field::from("v"))])
        );
    }

    #[test]
    fn unordered_map() {
        let reply = Reshape::UnorderedMap.apply(ok(&["a", "1", "b", "2"]).fields).unwrap();
        match reply {
            Reply::HashMap(map) => {
                assert_eq!(map.len(), 2);
                assert_eq!(map.get(&Field::from("b")), Some(&Field::from("2")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
