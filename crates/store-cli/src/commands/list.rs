//! List and count commands.

use common::{StoreConfig, StoreResult};
use persistence::repository::entities::person::{self, Model as Person};
use persistence::{Database, DbContext, Repository};

use crate::cli::ListArgs;

async fn person_repository(config: &StoreConfig) -> StoreResult<Repository<person::Entity>> {
    let database = Database::connect(&config.database).await?;
    Ok(Repository::new(DbContext::new(database.get_connection())))
}

/// One line per person
pub fn format_person(person: &Person) -> String {
    format!(
        "{}  {} {}  {}",
        person.entity_id,
        person.name.as_deref().unwrap_or("-"),
        person.surname.as_deref().unwrap_or("-"),
        person.birthday
    )
}

/// Execute the list command
pub async fn execute(args: ListArgs, config: StoreConfig) -> StoreResult<()> {
    let people = person_repository(&config)
        .await?
        .query(true)
        .await?
        .order_by_asc(person::Column::Name)
        .limit(args.limit)
        .all()
        .await?;

    for person in &people {
        println!("{}", format_person(person));
    }
    tracing::debug!(rows = people.len(), "Listed people");

    Ok(())
}

/// Execute the count command
pub async fn count(config: StoreConfig) -> StoreResult<()> {
    let total = person_repository(&config).await?.query(true).await?.count().await?;
    println!("{}", total);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_format_person_with_missing_names() {
        let birthday = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        let mut person = Person::new("Ada", "Lovelace", birthday);
        person.surname = None;

        let line = format_person(&person);

        assert!(line.starts_with(&person.entity_id.to_string()));
        assert!(line.contains("Ada -"));
        assert!(line.ends_with("1990-05-17"));
    }
}
