//! Person database entity for SeaORM.
//!
//! Sample entity used by the CLI and the test suites. It is a relational
//! entity (sea-orm model) and a document at the same time.

use chrono::{Days, NaiveDate};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use domain::{Entity as DomainEntity, PERSON_COLLECTION};

use crate::document::Document;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "person")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub entity_id: Uuid,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub birthday: Date,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl DomainEntity for Model {
    type Id = Uuid;

    fn entity_id(&self) -> Uuid {
        self.entity_id
    }
}

impl Document for Model {
    const COLLECTION: &'static str = PERSON_COLLECTION;
}

impl Model {
    /// New person with a fresh identifier
    pub fn new(name: impl Into<String>, surname: impl Into<String>, birthday: NaiveDate) -> Self {
        Self {
            entity_id: Uuid::new_v4(),
            name: Some(name.into()),
            surname: Some(surname.into()),
            birthday,
        }
    }
}

/// Generate `count` people named `Name-{i}` / `Surname-{i}`.
pub fn sample_people(count: usize) -> Vec<Model> {
    let base = NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default();

    (0..count)
        .map(|i| {
            let birthday = base
                .checked_add_days(Days::new((i % 10_000) as u64))
                .unwrap_or(base);
            Model::new(format!("Name-{}", i), format!("Surname-{}", i), birthday)
        })
        .collect()
}
