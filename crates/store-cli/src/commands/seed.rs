//! Seed command - bulk writes generated people.

use common::{StoreConfig, StoreError, StoreResult};
use domain::PERSON_TABLE;
use persistence::repository::entities::person::{self, sample_people};
use persistence::repository::entities::Person;
use persistence::{Database, DbContext, EntityRepository, Repository};

use crate::cli::SeedArgs;

/// Execute the seed command
pub async fn execute(args: SeedArgs, config: StoreConfig) -> StoreResult<()> {
    let database = Database::connect(&config.database).await?;
    let repository: Repository<person::Entity> =
        Repository::new(DbContext::new(database.get_connection()));

    let written = seed(&repository, &args, config.bulk_timeout_secs).await?;
    println!("{} people written to {}", written, args.table);

    Ok(())
}

/// Generate `args.count` people and bulk write them.
///
/// The entity's own table goes through `bulk_write`, anything else through
/// `bulk_write_into`. `--timeout` overrides the configured batch timeout.
pub async fn seed(
    repository: &dyn EntityRepository<Person>,
    args: &SeedArgs,
    default_timeout_secs: u64,
) -> StoreResult<u64> {
    let table = args.table.trim();
    if table.is_empty() {
        return Err(StoreError::configuration("Destination table must not be empty"));
    }

    let timeout_secs = args.timeout.unwrap_or(default_timeout_secs);
    let people = sample_people(args.count);
    tracing::info!(count = people.len(), table, timeout_secs, "Seeding people");

    if table == PERSON_TABLE {
        repository.bulk_write(&people, timeout_secs).await
    } else {
        repository.bulk_write_into(&people, table, timeout_secs).await
    }
}
