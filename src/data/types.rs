use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A structural type description with an optional name and attributes.
///
/// Two types are equal iff their structure and name match; attributes do not
/// participate in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Type {
    name: Option<String>,
    attributes: BTreeMap<String, Option<String>>,
    kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    None,
    Bool,
    Integer,
    Count,
    Real,
    Time,
    Duration,
    String,
    Pattern,
    Address,
    Subnet,
    Enumeration(Vec<String>),
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Record(Vec<RecordField>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub ty: Type,
}

impl RecordField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        RecordField {
            name: name.into(),
            ty,
        }
    }
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type {
            name: None,
            attributes: BTreeMap::new(),
            kind,
        }
    }

    pub fn none() -> Self {
        Type::new(TypeKind::None)
    }

    pub fn bool_() -> Self {
        Type::new(TypeKind::Bool)
    }

    pub fn integer() -> Self {
        Type::new(TypeKind::Integer)
    }

    pub fn count() -> Self {
        Type::new(TypeKind::Count)
    }

    pub fn real() -> Self {
        Type::new(TypeKind::Real)
    }

    pub fn time() -> Self {
        Type::new(TypeKind::Time)
    }

    pub fn duration() -> Self {
        Type::new(TypeKind::Duration)
    }

    pub fn string() -> Self {
        Type::new(TypeKind::String)
    }

    pub fn pattern() -> Self {
        Type::new(TypeKind::Pattern)
    }

    pub fn address() -> Self {
        Type::new(TypeKind::Address)
    }

    pub fn subnet() -> Self {
        Type::new(TypeKind::Subnet)
    }

    pub fn enumeration(fields: Vec<String>) -> Self {
        Type::new(TypeKind::Enumeration(fields))
    }

    pub fn list(elem: Type) -> Self {
        Type::new(TypeKind::List(Box::new(elem)))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Type::new(TypeKind::Map(Box::new(key), Box::new(value)))
    }

    pub fn record(fields: Vec<RecordField>) -> Self {
        Type::new(TypeKind::Record(fields))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    pub fn attributes(&self) -> &BTreeMap<String, Option<String>> {
        &self.attributes
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// A copy of this type without attributes, used as a key for per-type
    /// synopses.
    pub fn strip_attributes(&self) -> Type {
        Type {
            name: self.name.clone(),
            attributes: BTreeMap::new(),
            kind: self.kind.clone(),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self.kind, TypeKind::Record(_))
    }

    /// Flattens a record type into its leaf fields, dot-joining nested record
    /// names. Non-record types flatten to nothing.
    pub fn leaves(&self) -> Vec<(String, Type)> {
        let mut result = Vec::new();
        if let TypeKind::Record(fields) = &self.kind {
            for field in fields {
                match &field.ty.kind {
                    TypeKind::Record(_) => {
                        for (path, ty) in field.ty.leaves() {
                            result.push((format!("{}.{}", field.name, path), ty));
                        }
                    }
                    _ => result.push((field.name.clone(), field.ty.clone())),
                }
            }
        }
        result
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(name) = &self.name {
            return write!(f, "{}", name);
        }
        match &self.kind {
            TypeKind::None => write!(f, "none"),
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Integer => write!(f, "int"),
            TypeKind::Count => write!(f, "count"),
            TypeKind::Real => write!(f, "real"),
            TypeKind::Time => write!(f, "time"),
            TypeKind::Duration => write!(f, "duration"),
            TypeKind::String => write!(f, "string"),
            TypeKind::Pattern => write!(f, "pattern"),
            TypeKind::Address => write!(f, "addr"),
            TypeKind::Subnet => write!(f, "subnet"),
            TypeKind::Enumeration(fields) => write!(f, "enum {{{}}}", fields.join(", ")),
            TypeKind::List(elem) => write!(f, "list<{}>", elem),
            TypeKind::Map(key, value) => write!(f, "map<{}, {}>", key, value),
            TypeKind::Record(fields) => {
                write!(f, "record{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A field of a record layout, qualified by the layout name.
///
/// Identity is the fully qualified name alone; the type rides along as
/// payload so synopsis maps can be keyed by `(layout, field)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualifiedField {
    pub layout: String,
    pub field: String,
    pub ty: Type,
}

impl QualifiedField {
    pub fn new(layout: impl Into<String>, field: impl Into<String>, ty: Type) -> Self {
        QualifiedField {
            layout: layout.into(),
            field: field.into(),
            ty,
        }
    }

    /// The fully qualified name, dot-joined from the enclosing records.
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.layout, self.field)
    }
}

impl PartialEq for QualifiedField {
    fn eq(&self, other: &Self) -> bool {
        self.layout == other.layout && self.field == other.field
    }
}

impl Eq for QualifiedField {}

impl PartialOrd for QualifiedField {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QualifiedField {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.layout, &self.field).cmp(&(&other.layout, &other.field))
    }
}

impl Hash for QualifiedField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layout.hash(state);
        self.field.hash(state);
    }
}

impl fmt::Display for QualifiedField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.layout, self.field)
    }
}

/// Flattens a named record layout into its qualified leaf fields.
pub fn qualified_fields(layout: &Type) -> Vec<QualifiedField> {
    let name = match layout.name() {
        Some(name) => name.to_string(),
        None => return Vec::new(),
    };
    layout
        .leaves()
        .into_iter()
        .map(|(path, ty)| QualifiedField::new(name.clone(), path, ty))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_layout() -> Type {
        Type::record(vec![
            RecordField::new(
                "id",
                Type::record(vec![
                    RecordField::new("orig_h", Type::address()),
                    RecordField::new("resp_h", Type::address()),
                ]),
            ),
            RecordField::new("proto", Type::string()),
            RecordField::new("duration", Type::duration()),
        ])
        .with_name("zeek.conn")
    }

    #[test]
    fn equality_ignores_attributes() {
        let a = Type::time().with_attribute("timestamp", None);
        let b = Type::time();
        assert_eq!(a, b);
        assert!(a.has_attribute("timestamp"));
        assert!(!a.strip_attributes().has_attribute("timestamp"));
    }

    #[test]
    fn equality_respects_name() {
        let a = Type::count().with_name("port");
        let b = Type::count();
        assert_ne!(a, b);
        assert_eq!(a, Type::count().with_name("port"));
    }

    #[test]
    fn leaves_flatten_nested_records() {
        let layout = conn_layout();
        let fields = qualified_fields(&layout);
        let fqns: Vec<String> = fields.iter().map(|f| f.fqn()).collect();
        assert_eq!(
            fqns,
            vec![
                "zeek.conn.id.orig_h",
                "zeek.conn.id.resp_h",
                "zeek.conn.proto",
                "zeek.conn.duration",
            ]
        );
        assert_eq!(fields[0].ty, Type::address());
    }

    #[test]
    fn display_round_trips_kind_tokens() {
        assert_eq!(Type::address().to_string(), "addr");
        assert_eq!(Type::list(Type::count()).to_string(), "list<count>");
        assert_eq!(conn_layout().to_string(), "zeek.conn");
    }
}
