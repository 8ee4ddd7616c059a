//! Built schema: validated, flattened and immutable.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::entity::EntityType;
use super::relation::RelationshipDef;
use crate::error::Error;
use crate::security::merge_authorizations;

/// Collects entity types and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityType>,
}

impl SchemaBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity type.
    pub fn with_entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validate the collected types and build the schema.
    ///
    /// Inherited properties, relationships and authorization declarations are
    /// flattened into every subtype. Inherited relationships keep the name of
    /// the type that declared them as their owner.
    pub fn build(self) -> Result<Schema, Error> {
        let mut raw: HashMap<String, EntityType> = HashMap::new();
        for entity in self.entities {
            check_unique_members(&entity)?;
            if raw.contains_key(&entity.name) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate entity type '{}'",
                    entity.name
                )));
            }
            raw.insert(entity.name.clone(), entity);
        }

        let mut lineages: HashMap<String, Vec<String>> = HashMap::new();
        for name in raw.keys() {
            lineages.insert(name.clone(), linearize(name, &raw)?);
        }

        let mut flattened: HashMap<String, EntityType> = HashMap::new();
        for (name, lineage) in &lineages {
            let mut entity = raw[name].clone();
            entity.ancestors = lineage.iter().cloned().collect();

            for ancestor in lineage {
                let parent = &raw[ancestor];
                for property in &parent.properties {
                    if entity.property(&property.name).is_none() {
                        entity.properties.push(property.clone());
                    }
                }
                for relationship in &parent.relationships {
                    if entity.relationship(&relationship.name).is_none() {
                        entity.relationships.push(relationship.clone());
                    }
                }
            }

            for relationship in &entity.relationships {
                if !raw.contains_key(&relationship.target) {
                    return Err(Error::InvalidSchema(format!(
                        "relationship '{}' targets unknown type '{}'",
                        relationship.qualified_name(),
                        relationship.target
                    )));
                }
            }

            let chain = entity
                .authorizations
                .iter()
                .chain(lineage.iter().flat_map(|a| raw[a].authorizations.iter()));
            entity.merged_authorizations = merge_authorizations(&entity, chain)?;

            flattened.insert(name.clone(), entity);
        }

        for entity in flattened.values() {
            for relationship in &entity.relationships {
                check_inverse(relationship, &flattened)?;
            }
        }

        debug!(entities = flattened.len(), "schema built");

        Ok(Schema {
            entities: flattened
                .into_iter()
                .map(|(name, entity)| (name, Arc::new(entity)))
                .collect(),
        })
    }
}

fn check_unique_members(entity: &EntityType) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for name in entity
        .properties
        .iter()
        .map(|p| p.name.as_str())
        .chain(entity.relationships.iter().map(|r| r.name.as_str()))
    {
        if !seen.insert(name) {
            return Err(Error::InvalidSchema(format!(
                "duplicate member '{}' on type '{}'",
                name, entity.name
            )));
        }
    }
    Ok(())
}

/// Transitive supertypes of `name`, nearest first, each listed once.
fn linearize(name: &str, raw: &HashMap<String, EntityType>) -> Result<Vec<String>, Error> {
    fn visit(
        name: &str,
        raw: &HashMap<String, EntityType>,
        path: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> Result<(), Error> {
        let entity = raw
            .get(name)
            .ok_or_else(|| Error::InvalidSchema(format!("unknown supertype '{}'", name)))?;
        for supertype in &entity.supertypes {
            if path.iter().any(|p| p == supertype) {
                return Err(Error::InvalidSchema(format!(
                    "supertype cycle through '{}'",
                    supertype
                )));
            }
            if !out.contains(supertype) {
                out.push(supertype.clone());
            }
            path.push(supertype.clone());
            visit(supertype, raw, path, out)?;
            path.pop();
        }
        Ok(())
    }

    let mut path = vec![name.to_string()];
    let mut out = Vec::new();
    visit(name, raw, &mut path, &mut out)?;
    Ok(out)
}

fn check_inverse(
    relationship: &RelationshipDef,
    entities: &HashMap<String, EntityType>,
) -> Result<(), Error> {
    let Some(inverse_name) = &relationship.inverse else {
        return Ok(());
    };
    let qualified = relationship.qualified_name();
    let target = &entities[&relationship.target];
    let inverse = target.relationship(inverse_name).ok_or_else(|| {
        Error::InvalidSchema(format!(
            "inverse '{}' of '{}' not found on '{}'",
            inverse_name, qualified, target.name
        ))
    })?;

    if inverse.label != relationship.label || inverse.direction != relationship.direction.reverse()
    {
        return Err(Error::InvalidSchema(format!(
            "inverse '{}' of '{}' must use label '{}' in the opposite direction",
            inverse.qualified_name(),
            qualified,
            relationship.label
        )));
    }

    let owner = &entities[&relationship.owner];
    let inverse_target = &entities[&inverse.target];
    if !owner.is_subtype_of(&inverse_target.name) && !inverse_target.is_subtype_of(&owner.name) {
        return Err(Error::InvalidSchema(format!(
            "inverse '{}' targets '{}', unrelated to '{}'",
            inverse.qualified_name(),
            inverse.target,
            owner.name
        )));
    }

    if let Some(back) = &inverse.inverse {
        if back != &relationship.name {
            return Err(Error::InvalidSchema(format!(
                "inverse '{}' points back to '{}' instead of '{}'",
                inverse.qualified_name(),
                back,
                relationship.name
            )));
        }
    }
    Ok(())
}

/// Immutable schema shared by every request.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityType>>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Get an entity type by name.
    pub fn get(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.entities.get(name)
    }

    /// Get an entity type by name, failing with [`Error::UnknownEntity`].
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityType>, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Names of all entity types, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve the concrete type of a stored node from its labels.
    ///
    /// Picks the most derived non-abstract type among the labels.
    pub fn concrete_type<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a String>,
    ) -> Option<&Arc<EntityType>> {
        labels
            .into_iter()
            .filter_map(|label| self.entities.get(label))
            .filter(|entity| !entity.is_abstract)
            .max_by(|a, b| {
                a.ancestors
                    .len()
                    .cmp(&b.ancestors.len())
                    .then_with(|| b.name.cmp(&a.name))
            })
    }

    /// Names of all concrete types that are `name` or one of its subtypes.
    pub fn concrete_subtypes(&self, name: &str) -> BTreeSet<String> {
        self.entities
            .values()
            .filter(|entity| !entity.is_abstract && entity.is_subtype_of(name))
            .map(|entity| entity.name.clone())
            .collect()
    }

    /// The inverse of a relationship, if one is declared.
    pub fn inverse_of(&self, relationship: &RelationshipDef) -> Option<&RelationshipDef> {
        let inverse = relationship.inverse.as_deref()?;
        self.entities.get(&relationship.target)?.relationship(inverse)
    }
}
