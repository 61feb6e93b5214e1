//! Production management adapter over the `pm-api` REST client

use super::PmClient;
use crate::config::PmSettings;
use crate::Result;
use pm_api::{Entity, FieldSchema, Filter, PmApi};
use std::collections::BTreeMap;

/// Build a REST client from settings, reading the script key from the environment
pub fn connect(settings: &PmSettings) -> Result<PmApi> {
    let key = settings.script_key()?;
    Ok(PmApi::new(&settings.url, settings.script_name.clone(), key)?)
}

impl PmClient for PmApi {
    fn find(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Vec<Entity>> {
        Ok(PmApi::find(self, entity_type, filters, fields)?)
    }

    fn find_one(&self, entity_type: &str, filters: &[Filter], fields: &[&str]) -> Result<Option<Entity>> {
        Ok(PmApi::find_one(self, entity_type, filters, fields)?)
    }

    fn create(&self, entity_type: &str, data: &Entity) -> Result<Entity> {
        Ok(PmApi::create(self, entity_type, data)?)
    }

    fn update(&self, entity_type: &str, id: i64, data: &Entity) -> Result<Entity> {
        Ok(PmApi::update(self, entity_type, id, data)?)
    }

    fn schema_field_read(&self, entity_type: &str) -> Result<BTreeMap<String, FieldSchema>> {
        Ok(PmApi::schema_field_read(self, entity_type)?)
    }
}
