//! Template expressions and intrinsic functions.
//!
//! Property values in a template are either plain JSON or intrinsic
//! functions (`Ref`, `Fn::GetAtt`, `Fn::Join`, ...) that the deployment
//! engine resolves later. [`Expr`] keeps them apart so the resource graph
//! can see every reference a resource makes.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Pseudo parameter for the deployment region.
pub const AWS_REGION: &str = "AWS::Region";
/// Pseudo parameter for the deployment account.
pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";
/// Pseudo parameter for the partition (`aws`, `aws-cn`, ...).
pub const AWS_PARTITION: &str = "AWS::Partition";
/// Pseudo parameter for the URL suffix (`amazonaws.com`).
pub const AWS_URL_SUFFIX: &str = "AWS::URLSuffix";
/// Pseudo parameter for the stack name.
pub const AWS_STACK_NAME: &str = "AWS::StackName";

static SUB_VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^!}][^}]*)\}").expect("static regex"));

/// A template value: literal JSON or an intrinsic function.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Scalar JSON literal (string, number, bool or null)
    Literal(Value),
    /// List of expressions
    Array(Vec<Expr>),
    /// Map of expressions, order preserved
    Object(IndexMap<String, Expr>),
    /// `{"Ref": id}`
    Ref(String),
    /// `{"Fn::GetAtt": [id, attribute]}`
    GetAtt(String, String),
    /// `{"Fn::Join": [delimiter, [parts]]}`
    Join(String, Vec<Expr>),
    /// `{"Fn::Select": [index, list]}`
    Select(usize, Box<Expr>),
    /// `{"Fn::GetAZs": region}`
    GetAzs(String),
    /// `{"Fn::Sub": template}`
    Sub(String),
}

impl Expr {
    /// String literal.
    pub fn str(value: impl Into<String>) -> Self {
        Expr::Literal(Value::String(value.into()))
    }

    /// `Ref` to a logical id or pseudo parameter.
    pub fn reference(target: impl Into<String>) -> Self {
        Expr::Ref(target.into())
    }

    /// `Fn::GetAtt` of a resource attribute.
    pub fn get_att(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Expr::GetAtt(target.into(), attribute.into())
    }

    /// `Fn::Join` with an empty delimiter, the common ARN-building form.
    pub fn concat(parts: Vec<Expr>) -> Self {
        Expr::Join(String::new(), parts)
    }

    /// `Ref` to `AWS::Partition`.
    pub fn partition() -> Self {
        Expr::Ref(AWS_PARTITION.to_string())
    }

    /// `Ref` to `AWS::Region`.
    pub fn region() -> Self {
        Expr::Ref(AWS_REGION.to_string())
    }

    /// `Ref` to `AWS::AccountId`.
    pub fn account_id() -> Self {
        Expr::Ref(AWS_ACCOUNT_ID.to_string())
    }

    /// Object from key/value pairs.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Expr)>) -> Self {
        Expr::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Array from expressions.
    pub fn array(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Array(items.into_iter().collect())
    }

    /// Returns the string if this is a string literal.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Expr::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean literal.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Expr::Literal(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Whether the expression contains no intrinsic function.
    pub fn is_literal(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Array(items) => items.iter().all(Expr::is_literal),
            Expr::Object(map) => map.values().all(Expr::is_literal),
            _ => false,
        }
    }

    /// Look up a key on an object expression.
    pub fn get(&self, key: &str) -> Option<&Expr> {
        match self {
            Expr::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Mutable lookup on an object expression.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Expr> {
        match self {
            Expr::Object(map) => map.get_mut(key),
            _ => None,
        }
    }

    /// Follow a dotted path through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Expr> {
        path.split('.').try_fold(self, |current, key| current.get(key))
    }

    /// Array items, if this is an array.
    pub fn items(&self) -> &[Expr] {
        match self {
            Expr::Array(items) => items,
            _ => &[],
        }
    }

    /// Logical ids referenced by this expression, pseudo parameters excluded.
    ///
    /// Order follows first appearance; duplicates are removed.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) | Expr::GetAzs(_) => {}
            Expr::Ref(id) | Expr::GetAtt(id, _) => push_reference(out, id),
            Expr::Sub(template) => {
                for caps in SUB_VARIABLE.captures_iter(template) {
                    let var = &caps[1];
                    let id = var.split('.').next().unwrap_or(var);
                    push_reference(out, id);
                }
            }
            Expr::Array(items) | Expr::Join(_, items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Expr::Object(map) => {
                for value in map.values() {
                    value.collect_references(out);
                }
            }
            Expr::Select(_, list) => list.collect_references(out),
        }
    }

    /// Render as template JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Array(items) => Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            Expr::Ref(id) => single("Ref", Value::String(id.clone())),
            Expr::GetAtt(id, attr) => single(
                "Fn::GetAtt",
                Value::Array(vec![Value::String(id.clone()), Value::String(attr.clone())]),
            ),
            Expr::Join(delimiter, parts) => single(
                "Fn::Join",
                Value::Array(vec![
                    Value::String(delimiter.clone()),
                    Value::Array(parts.iter().map(Expr::to_json).collect()),
                ]),
            ),
            Expr::Select(index, list) => single(
                "Fn::Select",
                Value::Array(vec![Value::from(*index), list.to_json()]),
            ),
            Expr::GetAzs(region) => single("Fn::GetAZs", Value::String(region.clone())),
            Expr::Sub(template) => single("Fn::Sub", Value::String(template.clone())),
        }
    }

    /// Parse template JSON, recognising intrinsic functions.
    ///
    /// Malformed intrinsics are kept as plain objects.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => Expr::Array(items.into_iter().map(Expr::from_json).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(expr) = parse_intrinsic(&map) {
                        return expr;
                    }
                }
                Expr::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, Expr::from_json(v)))
                        .collect(),
                )
            }
            scalar => Expr::Literal(scalar),
        }
    }
}

fn push_reference(out: &mut Vec<String>, id: &str) {
    if !is_pseudo_parameter(id) && !out.iter().any(|existing| existing == id) {
        out.push(id.to_string());
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn parse_intrinsic(map: &Map<String, Value>) -> Option<Expr> {
    let (key, value) = map.iter().next()?;
    match key.as_str() {
        "Ref" => value.as_str().map(Expr::reference),
        "Fn::GetAtt" => match value {
            Value::Array(parts) if parts.len() == 2 => Some(Expr::get_att(
                parts[0].as_str()?,
                parts[1].as_str()?,
            )),
            Value::String(dotted) => {
                let (id, attr) = dotted.split_once('.')?;
                Some(Expr::get_att(id, attr))
            }
            _ => None,
        },
        "Fn::Join" => {
            let parts = value.as_array()?;
            if parts.len() != 2 {
                return None;
            }
            let delimiter = parts[0].as_str()?.to_string();
            let items = parts[1].as_array()?.iter().cloned().map(Expr::from_json);
            Some(Expr::Join(delimiter, items.collect()))
        }
        "Fn::Select" => {
            let parts = value.as_array()?;
            if parts.len() != 2 {
                return None;
            }
            let index = match &parts[0] {
                Value::Number(n) => usize::try_from(n.as_u64()?).ok()?,
                Value::String(s) => s.parse().ok()?,
                _ => return None,
            };
            Some(Expr::Select(index, Box::new(Expr::from_json(parts[1].clone()))))
        }
        "Fn::GetAZs" => value.as_str().map(|r| Expr::GetAzs(r.to_string())),
        "Fn::Sub" => value.as_str().map(|t| Expr::Sub(t.to_string())),
        _ => None,
    }
}

/// Whether `id` names a pseudo parameter rather than a resource.
pub fn is_pseudo_parameter(id: &str) -> bool {
    id.starts_with("AWS::")
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Expr::from_json)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::str(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::str(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(Value::Bool(value))
    }
}

impl From<u16> for Expr {
    fn from(value: u16) -> Self {
        Expr::Literal(Value::from(value))
    }
}

impl From<u32> for Expr {
    fn from(value: u32) -> Self {
        Expr::Literal(Value::from(value))
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(value: Vec<Expr>) -> Self {
        Expr::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intrinsic_json_shapes() {
        assert_eq!(Expr::reference("MyVpc").to_json(), json!({"Ref": "MyVpc"}));
        assert_eq!(
            Expr::get_att("Instance", "Endpoint.Address").to_json(),
            json!({"Fn::GetAtt": ["Instance", "Endpoint.Address"]})
        );
        assert_eq!(
            Expr::concat(vec![Expr::str("arn:"), Expr::partition()]).to_json(),
            json!({"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}]]})
        );
        assert_eq!(
            Expr::Select(1, Box::new(Expr::GetAzs(String::new()))).to_json(),
            json!({"Fn::Select": [1, {"Fn::GetAZs": ""}]})
        );
    }

    #[test]
    fn test_from_json_recognises_intrinsics() {
        let value = json!({
            "Variables": {
                "DB_ENDPOINT": {"Fn::GetAtt": ["InstanceC1063A87", "Endpoint.Address"]},
                "DB_NAME": {"Ref": "InstanceC1063A87"}
            }
        });
        let expr = Expr::from_json(value.clone());
        assert_eq!(
            expr.get_path("Variables.DB_NAME"),
            Some(&Expr::reference("InstanceC1063A87"))
        );
        assert_eq!(expr.to_json(), value);
    }

    #[test]
    fn test_dotted_get_att_is_accepted() {
        let expr = Expr::from_json(json!({"Fn::GetAtt": "Fn.Arn"}));
        assert_eq!(expr, Expr::get_att("Fn", "Arn"));
    }

    #[test]
    fn test_references_skip_pseudo_parameters() {
        let expr = Expr::concat(vec![
            Expr::str("arn:"),
            Expr::partition(),
            Expr::get_att("Db", "DbiResourceId"),
            Expr::reference("Db"),
            Expr::Sub("cdk-assets-${AWS::AccountId}-${Bucket.Arn}-${!Literal}".into()),
        ]);
        assert_eq!(expr.references(), vec!["Db".to_string(), "Bucket".to_string()]);
    }

    #[test]
    fn test_is_literal() {
        assert!(Expr::object([("a", Expr::str("b"))]).is_literal());
        assert!(!Expr::object([("a", Expr::reference("X"))]).is_literal());
    }
}
