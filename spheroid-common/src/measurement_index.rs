//! Measurement index: selector resolution and matrix retrieval
//!
//! Maps (object type, stack, channel, measurement name, measurement type)
//! selectors to measurement definitions, memoizing resolutions in a bounded
//! cache, and pulls annotated matrices for sets of objects.

use crate::cache::LruCache;
use crate::db::models::MeasurementDefinition;
use crate::db::TabularStore;
use crate::matrix::AnnotatedMatrix;
use crate::predicate::Predicate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selects measurement definitions; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasurementSelector {
    /// Restrict to definitions with at least one value on objects of this type
    pub object_type: Option<String>,
    pub stack: Option<String>,
    pub channel: Option<String>,
    pub measurement_name: Option<String>,
    pub measurement_type: Option<String>,
}

impl MeasurementSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    pub fn stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn measurement_name(mut self, name: impl Into<String>) -> Self {
        self.measurement_name = Some(name.into());
        self
    }

    pub fn measurement_type(mut self, measurement_type: impl Into<String>) -> Self {
        self.measurement_type = Some(measurement_type.into());
        self
    }
}

impl fmt::Display for MeasurementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "*".to_string());
        write!(
            f,
            "[object_type={} stack={} channel={} name={} type={}]",
            field(&self.object_type),
            field(&self.stack),
            field(&self.channel),
            field(&self.measurement_name),
            field(&self.measurement_type)
        )
    }
}

/// Selector resolution with a bounded memo
#[derive(Debug)]
pub struct MeasurementIndex {
    store: TabularStore,
    resolved: LruCache<MeasurementSelector, Vec<MeasurementDefinition>>,
}

impl MeasurementIndex {
    pub fn new(store: TabularStore, cache_capacity: usize) -> Self {
        Self {
            store,
            resolved: LruCache::new(cache_capacity),
        }
    }

    pub fn store(&self) -> &TabularStore {
        &self.store
    }

    /// Every definition matching `selector`; zero matches is `NotFound`
    pub async fn resolve(&mut self, selector: &MeasurementSelector) -> Result<Vec<MeasurementDefinition>> {
        if let Some(hit) = self.resolved.get(selector) {
            return Ok(hit);
        }
        let definitions = self.store.find_measurement_definitions(selector).await?;
        if definitions.is_empty() {
            return Err(Error::NotFound(format!("no measurement matches {}", selector)));
        }
        self.resolved.put(selector.clone(), definitions.clone());
        Ok(definitions)
    }

    /// The single definition matching `selector`
    ///
    /// Zero matches is `NotFound`, more than one is `AmbiguousMeasurement`.
    pub async fn resolve_one(&mut self, selector: &MeasurementSelector) -> Result<MeasurementDefinition> {
        let mut definitions = self.resolve(selector).await?;
        if definitions.len() > 1 {
            let labels: Vec<String> = definitions.iter().map(|d| d.label()).collect();
            return Err(Error::AmbiguousMeasurement(format!(
                "{} matches {} definitions: {}",
                selector,
                definitions.len(),
                labels.join(", ")
            )));
        }
        Ok(definitions.remove(0))
    }

    /// Union of the definitions of several selectors, deduplicated, ordered by id
    pub async fn resolve_any(&mut self, selectors: &[MeasurementSelector]) -> Result<Vec<MeasurementDefinition>> {
        let mut out: Vec<MeasurementDefinition> = Vec::new();
        for selector in selectors {
            for d in self.resolve(selector).await? {
                if !out.iter().any(|o| o.measurement_id == d.measurement_id) {
                    out.push(d);
                }
            }
        }
        if out.is_empty() {
            return Err(Error::NotFound("empty measurement selector list".to_string()));
        }
        out.sort_by_key(|d| d.measurement_id);
        Ok(out)
    }

    /// Raw matrix of `definitions` for the objects matching `objects`
    pub async fn get_measurements(
        &self,
        objects: &Predicate,
        definitions: &[MeasurementDefinition],
    ) -> Result<AnnotatedMatrix> {
        self.store.get_measurements(objects, definitions).await
    }

    /// Calibrated matrix of `definitions` for the objects matching `objects`
    pub async fn get_scaled_measurements(
        &self,
        objects: &Predicate,
        definitions: &[MeasurementDefinition],
    ) -> Result<AnnotatedMatrix> {
        Ok(self.store.get_measurements(objects, definitions).await?.scaled())
    }

    /// Forget memoized resolutions (call after new definitions are registered)
    pub fn clear_caches(&mut self) {
        self.resolved.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_in_memory;

    async fn index_with_two_channels() -> MeasurementIndex {
        let store = TabularStore::new(init_in_memory().await.unwrap());
        let stack = store.ensure_stack("FullStack", 1.0).await.unwrap();
        for channel in ["Pd102", "Pd104"] {
            let plane = store.ensure_plane(stack, channel, 1.0).await.unwrap();
            store
                .register_measurement_definition("MeanIntensity", "Intensity", Some(plane))
                .await
                .unwrap();
        }
        MeasurementIndex::new(store, 8)
    }

    #[tokio::test]
    async fn test_resolve_one_ambiguous_and_not_found() {
        let mut index = index_with_two_channels().await;

        let broad = MeasurementSelector::new().measurement_name("MeanIntensity");
        assert_eq!(index.resolve(&broad).await.unwrap().len(), 2);
        assert!(matches!(
            index.resolve_one(&broad).await,
            Err(Error::AmbiguousMeasurement(_))
        ));

        let narrow = broad.clone().channel("Pd104");
        assert_eq!(
            index.resolve_one(&narrow).await.unwrap().channel_name.as_deref(),
            Some("Pd104")
        );

        let missing = broad.channel("Ir191");
        assert!(matches!(index.resolve(&missing).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cache_serves_until_cleared() {
        let mut index = index_with_two_channels().await;
        let selector = MeasurementSelector::new().measurement_name("MeanIntensity");
        assert_eq!(index.resolve(&selector).await.unwrap().len(), 2);

        // A third channel registered after the first resolution
        let stack = index.store().ensure_stack("FullStack", 1.0).await.unwrap();
        let plane = index.store().ensure_plane(stack, "Pd106", 1.0).await.unwrap();
        index
            .store()
            .register_measurement_definition("MeanIntensity", "Intensity", Some(plane))
            .await
            .unwrap();

        assert_eq!(index.resolve(&selector).await.unwrap().len(), 2);
        index.clear_caches();
        assert_eq!(index.resolve(&selector).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_any_unions_selectors() {
        let mut index = index_with_two_channels().await;
        let a = MeasurementSelector::new().channel("Pd102");
        let b = MeasurementSelector::new().channel("Pd104");
        let both = index.resolve_any(&[a.clone(), b, a]).await.unwrap();
        assert_eq!(both.len(), 2);
    }
}
