//! Resource keys addressing cache slots.
//!
//! A key is `(entity kind, canonical parameter list)`. Parameters are kept
//! sorted by name so two callers building the same logical key in different
//! orders share one cache slot.

use crate::EntityKind;
use std::fmt;

/// Composite identifier for one cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    entity: EntityKind,
    /// Sorted by parameter name; duplicate names keep the last value set.
    params: Vec<(String, String)>,
}

impl ResourceKey {
    /// Key for an unparameterized listing, e.g. all nodes.
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            params: Vec::new(),
        }
    }

    /// Add or replace one query parameter, keeping canonical order.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.params.retain(|(n, _)| *n != name);
        self.params.push((name, value.into()));
        self.params.sort_by(|a, b| a.0.cmp(&b.0));
        self
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity.table_name())?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

/// Pattern matching resource keys for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Every key of one entity kind.
    Entity(EntityKind),
    /// Keys of one kind carrying all of the given parameters; extra
    /// parameters on the key are allowed.
    Params {
        entity: EntityKind,
        params: Vec<(String, String)>,
    },
    /// Exactly one key.
    Exact(ResourceKey),
}

impl KeyPattern {
    /// Match every key of one entity kind.
    pub fn entity(entity: EntityKind) -> Self {
        KeyPattern::Entity(entity)
    }

    /// Match keys of one kind carrying all of the given parameters.
    pub fn with_params(entity: EntityKind, params: Vec<(String, String)>) -> Self {
        KeyPattern::Params { entity, params }
    }

    /// Match exactly one key.
    pub fn exact(key: &ResourceKey) -> Self {
        KeyPattern::Exact(key.clone())
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            KeyPattern::Entity(entity) => *entity,
            KeyPattern::Params { entity, .. } => *entity,
            KeyPattern::Exact(key) => key.entity(),
        }
    }

    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            KeyPattern::Entity(entity) => key.entity() == *entity,
            KeyPattern::Params { entity, params } => {
                key.entity() == *entity
                    && params
                        .iter()
                        .all(|(name, value)| key.params().iter().any(|(n, v)| n == name && v == value))
            }
            KeyPattern::Exact(exact) => key == exact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_order_irrelevant() {
        let a = ResourceKey::new(EntityKind::Nodes)
            .with_param("search", "pump")
            .with_param("community", "c3");
        let b = ResourceKey::new(EntityKind::Nodes)
            .with_param("community", "c3")
            .with_param("search", "pump");
        assert_eq!(a, b);
    }

    #[test]
    fn test_param_replacement() {
        let key = ResourceKey::new(EntityKind::Nodes)
            .with_param("search", "pump")
            .with_param("search", "tank");
        assert_eq!(key.params(), &[("search".to_string(), "tank".to_string())]);
    }

    #[test]
    fn test_display_canonical() {
        let key = ResourceKey::new(EntityKind::Nodes)
            .with_param("search", "pump")
            .with_param("community", "c3");
        assert_eq!(key.to_string(), "nodes?community=c3&search=pump");
        assert_eq!(ResourceKey::new(EntityKind::Alerts).to_string(), "alerts");
    }

    #[test]
    fn test_entity_pattern_matches_all_params() {
        let pattern = KeyPattern::entity(EntityKind::Nodes);
        assert!(pattern.matches(&ResourceKey::new(EntityKind::Nodes)));
        assert!(pattern.matches(&ResourceKey::new(EntityKind::Nodes).with_param("search", "x")));
        assert!(!pattern.matches(&ResourceKey::new(EntityKind::Alerts)));
    }

    #[test]
    fn test_params_pattern_is_subset_match() {
        let pattern = KeyPattern::with_params(
            EntityKind::Nodes,
            vec![("community".to_string(), "c3".to_string())],
        );
        let narrower = ResourceKey::new(EntityKind::Nodes)
            .with_param("community", "c3")
            .with_param("search", "pump");
        assert!(pattern.matches(&narrower));
        assert!(!pattern.matches(&ResourceKey::new(EntityKind::Nodes)));
    }

    #[test]
    fn test_exact_pattern() {
        let key = ResourceKey::new(EntityKind::Alerts).with_param("active", "true");
        let pattern = KeyPattern::exact(&key);
        assert!(pattern.matches(&key));
        assert!(!pattern.matches(&ResourceKey::new(EntityKind::Alerts)));
    }
}
