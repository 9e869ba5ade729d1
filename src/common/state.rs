use crate::adapters::{DeliverySink, ToneGenerator};
use crate::common::context::Context;
use crate::common::tone_catalog::ToneCatalog;
use crate::models::delivery::DeliveryPolicy;
use crate::models::generation::GenerationPolicy;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub tones: Arc<ToneCatalog>,
    pub generator: Arc<dyn ToneGenerator>,
    pub sink: Arc<dyn DeliverySink>,
    pub delivery: DeliveryPolicy,
    pub generation: GenerationPolicy,
    pub default_timezone: Arc<str>,
}

impl Context for AppState {
    fn db(&self) -> &Pool<Sqlite> {
        &self.db
    }

    fn tone_catalog(&self) -> &ToneCatalog {
        &self.tones
    }

    fn tone_generator(&self) -> Arc<dyn ToneGenerator> {
        self.generator.clone()
    }

    fn delivery_sink(&self) -> &dyn DeliverySink {
        self.sink.as_ref()
    }

    fn delivery_policy(&self) -> &DeliveryPolicy {
        &self.delivery
    }

    fn generation_policy(&self) -> &GenerationPolicy {
        &self.generation
    }

    fn default_timezone(&self) -> &str {
        &self.default_timezone
    }
}
