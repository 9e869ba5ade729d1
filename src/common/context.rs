use crate::adapters::{DeliverySink, ToneGenerator};
use crate::common::tone_catalog::ToneCatalog;
use crate::models::delivery::DeliveryPolicy;
use crate::models::generation::GenerationPolicy;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

pub trait Context: Sync + Send {
    fn db(&self) -> &Pool<Sqlite>;
    fn tone_catalog(&self) -> &ToneCatalog;
    fn tone_generator(&self) -> Arc<dyn ToneGenerator>;
    fn delivery_sink(&self) -> &dyn DeliverySink;
    fn delivery_policy(&self) -> &DeliveryPolicy;
    fn generation_policy(&self) -> &GenerationPolicy;
    fn default_timezone(&self) -> &str;
}
