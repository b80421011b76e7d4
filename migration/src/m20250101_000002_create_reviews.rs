use sea_orm_migration::{prelude::*, schema::*};

use crate::m20250101_000001_create_movies::Movies;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reviews::Table)
                    .if_not_exists()
                    .col(pk_auto(Reviews::Id))
                    .col(integer(Reviews::MovieId))
                    .col(string_null(Reviews::ReviewerName))
                    .col(double(Reviews::Rating))
                    .col(text(Reviews::ReviewComments))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reviews_movie_id")
                            .from(Reviews::Table, Reviews::MovieId)
                            .to(Movies::Table, Movies::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_movie_id")
                    .table(Reviews::Table)
                    .col(Reviews::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Reviews::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Reviews {
    Table,
    Id,
    MovieId,
    ReviewerName,
    Rating,
    ReviewComments,
}
