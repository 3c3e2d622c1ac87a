//! Migration: Create the person table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Person::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Person::EntityId).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Person::Name).string().null())
                    .col(ColumnDef::new(Person::Surname).string().null())
                    .col(ColumnDef::new(Person::Birthday).date().not_null())
                    .to_owned(),
            )
            .await?;

        // Lookups by surname are the common filter
        manager
            .create_index(
                Index::create()
                    .name("idx_person_surname")
                    .table(Person::Table)
                    .col(Person::Surname)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Person::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Person {
    Table,
    EntityId,
    Name,
    Surname,
    Birthday,
}
