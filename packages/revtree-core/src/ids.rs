use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-entity revision number, used as the optimistic concurrency token.
pub type Revision = i64;

/// Revision of an entity that exists but was never stamped, e.g. an object
/// created inside an overlay that has not been committed yet.
pub const REVISION_UNDEFINED: Revision = -1;

/// Revision of a model that has been removed from its repository.
pub const REVISION_NOT_EXISTING: Revision = -2;

/// Valid revisions are non-negative; every sentinel is below zero.
pub fn is_valid_revision(revision: Revision) -> bool {
    revision >= 0
}

const MAX_ID_LEN: usize = 100;

/// Identifier of a repository, model, object, or field.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return Err(Error::InvalidId("identifier must not be empty".into()));
    };
    if id.len() > MAX_ID_LEN {
        return Err(Error::InvalidId(format!(
            "identifier longer than {MAX_ID_LEN} bytes"
        )));
    }
    if !(first.is_alphabetic() || first == '_' || first == ':') {
        return Err(Error::InvalidId(format!(
            "identifier {id:?} must start with a letter, '_' or ':'"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))) {
        return Err(Error::InvalidId(format!(
            "identifier {id:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

impl TryFrom<String> for Id {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four levels of the entity tree.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntityKind {
    Repository,
    Model,
    Object,
    Field,
}

/// Position in the tree: `(repository, model?, object?, field?)` without gaps.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Address {
    repository: Id,
    model: Option<Id>,
    object: Option<Id>,
    field: Option<Id>,
}

impl Address {
    pub fn new(
        repository: Id,
        model: Option<Id>,
        object: Option<Id>,
        field: Option<Id>,
    ) -> Result<Self> {
        let gap = (model.is_none() && (object.is_some() || field.is_some()))
            || (object.is_none() && field.is_some());
        if gap {
            return Err(Error::InvalidAddress(format!(
                "address below {repository} skips a level"
            )));
        }
        Ok(Self {
            repository,
            model,
            object,
            field,
        })
    }

    pub fn repository(repository: Id) -> Self {
        Self {
            repository,
            model: None,
            object: None,
            field: None,
        }
    }

    pub fn model(repository: Id, model: Id) -> Self {
        Self {
            repository,
            model: Some(model),
            object: None,
            field: None,
        }
    }

    pub fn object(repository: Id, model: Id, object: Id) -> Self {
        Self {
            repository,
            model: Some(model),
            object: Some(object),
            field: None,
        }
    }

    pub fn field(repository: Id, model: Id, object: Id, field: Id) -> Self {
        Self {
            repository,
            model: Some(model),
            object: Some(object),
            field: Some(field),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match (&self.model, &self.object, &self.field) {
            (None, _, _) => EntityKind::Repository,
            (Some(_), None, _) => EntityKind::Model,
            (Some(_), Some(_), None) => EntityKind::Object,
            (Some(_), Some(_), Some(_)) => EntityKind::Field,
        }
    }

    pub fn repository_id(&self) -> &Id {
        &self.repository
    }

    pub fn model_id(&self) -> Option<&Id> {
        self.model.as_ref()
    }

    pub fn object_id(&self) -> Option<&Id> {
        self.object.as_ref()
    }

    pub fn field_id(&self) -> Option<&Id> {
        self.field.as_ref()
    }

    /// Id of the addressed entity itself (the deepest present component).
    pub fn id(&self) -> &Id {
        self.field
            .as_ref()
            .or(self.object.as_ref())
            .or(self.model.as_ref())
            .unwrap_or(&self.repository)
    }

    pub fn parent(&self) -> Option<Address> {
        match self.kind() {
            EntityKind::Repository => None,
            EntityKind::Model => Some(Self::repository(self.repository.clone())),
            EntityKind::Object => self.model_address(),
            EntityKind::Field => self.object_address(),
        }
    }

    /// Address one level down, or `None` when `self` already addresses a field.
    pub fn child(&self, id: Id) -> Option<Address> {
        let mut child = self.clone();
        match self.kind() {
            EntityKind::Repository => child.model = Some(id),
            EntityKind::Model => child.object = Some(id),
            EntityKind::Object => child.field = Some(id),
            EntityKind::Field => return None,
        }
        Some(child)
    }

    /// Model address below this repository address.
    pub fn with_model(&self, model: Id) -> Address {
        debug_assert_eq!(self.kind(), EntityKind::Repository, "{self} is not a repository");
        Self::model(self.repository.clone(), model)
    }

    /// Object address below this model address.
    pub fn with_object(&self, object: Id) -> Address {
        debug_assert_eq!(self.kind(), EntityKind::Model, "{self} is not a model");
        Self {
            repository: self.repository.clone(),
            model: self.model.clone(),
            object: Some(object),
            field: None,
        }
    }

    /// Field address below this object address.
    pub fn with_field(&self, field: Id) -> Address {
        debug_assert_eq!(self.kind(), EntityKind::Object, "{self} is not an object");
        Self {
            repository: self.repository.clone(),
            model: self.model.clone(),
            object: self.object.clone(),
            field: Some(field),
        }
    }

    pub fn model_address(&self) -> Option<Address> {
        self.model
            .as_ref()
            .map(|model| Self::model(self.repository.clone(), model.clone()))
    }

    pub fn object_address(&self) -> Option<Address> {
        match (&self.model, &self.object) {
            (Some(model), Some(object)) => Some(Self::object(
                self.repository.clone(),
                model.clone(),
                object.clone(),
            )),
            _ => None,
        }
    }

    /// True when `other` is `self` or lies somewhere below it.
    pub fn contains(&self, other: &Address) -> bool {
        fn prefix(outer: &Option<Id>, inner: &Option<Id>) -> bool {
            match (outer, inner) {
                (None, _) => true,
                (Some(a), Some(b)) => a == b,
                (Some(_), None) => false,
            }
        }
        self.repository == other.repository
            && prefix(&self.model, &other.model)
            && prefix(&self.object, &other.object)
            && prefix(&self.field, &other.field)
    }

    pub fn is_parent_of(&self, other: &Address) -> bool {
        other.parent().as_ref() == Some(self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.repository)?;
        for part in [&self.model, &self.object, &self.field] {
            match part {
                Some(id) => write!(f, "/{id}")?,
                None => f.write_str("/-")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parses `/repo/model/object/field`; trailing components may be `-` or omitted.
    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(Error::InvalidAddress(format!("{s:?} must start with '/'")));
        };
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(Error::InvalidAddress(format!(
                "{s:?} must have between one and four components"
            )));
        }
        let component = |idx: usize| -> Result<Option<Id>> {
            match parts.get(idx) {
                None | Some(&"-") => Ok(None),
                Some(part) => Id::new(*part).map(Some),
            }
        };
        let repository = Id::new(parts[0])?;
        Self::new(repository, component(1)?, component(2)?, component(3)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        Id::new(s).unwrap()
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(Id::new("").is_err());
        assert!(Id::new("1abc").is_err());
        assert!(Id::new("-").is_err());
        assert!(Id::new("has space").is_err());
        assert!(Id::new("x".repeat(101)).is_err());
        assert!(Id::new("_ok-1.2:3").is_ok());
    }

    #[test]
    fn address_kinds_and_parents() {
        let field = Address::field(id("r"), id("m"), id("o"), id("f"));
        assert_eq!(field.kind(), EntityKind::Field);
        assert_eq!(field.id(), &id("f"));

        let object = field.parent().unwrap();
        assert_eq!(object, Address::object(id("r"), id("m"), id("o")));
        assert!(object.is_parent_of(&field));

        let model = object.parent().unwrap();
        let repo = model.parent().unwrap();
        assert_eq!(repo.kind(), EntityKind::Repository);
        assert!(repo.parent().is_none());
        assert!(field.child(id("x")).is_none());
        assert_eq!(model.child(id("o")), Some(object));
    }

    #[test]
    fn containment_follows_prefixes() {
        let model = Address::model(id("r"), id("m"));
        let object = model.with_object(id("o"));
        let other = Address::object(id("r"), id("n"), id("o"));
        assert!(model.contains(&model));
        assert!(model.contains(&object));
        assert!(model.contains(&object.with_field(id("f"))));
        assert!(!model.contains(&other));
        assert!(!object.contains(&model));
    }

    #[test]
    fn rejects_gaps() {
        assert!(Address::new(id("r"), None, Some(id("o")), None).is_err());
        assert!(Address::new(id("r"), Some(id("m")), None, Some(id("f"))).is_err());
    }

    #[test]
    fn display_parses_back() {
        let field = Address::field(id("r"), id("m"), id("o"), id("f"));
        assert_eq!(field.to_string(), "/r/m/o/f");
        assert_eq!("/r/m/o/f".parse::<Address>().unwrap(), field);

        let model = Address::model(id("r"), id("m"));
        assert_eq!(model.to_string(), "/r/m/-/-");
        assert_eq!("/r/m".parse::<Address>().unwrap(), model);
        assert!("r/m".parse::<Address>().is_err());
        assert!("/r/-/o".parse::<Address>().is_err());
    }
}
