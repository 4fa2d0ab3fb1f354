use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per (symbol, interval, open_time); coverage is derived from the keys
        manager
            .create_table(
                Table::create()
                    .table(Candles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Candles::Symbol).string().not_null())
                    .col(ColumnDef::new(Candles::Interval).string().not_null())
                    .col(ColumnDef::new(Candles::OpenTime).big_integer().not_null())
                    .col(ColumnDef::new(Candles::CloseTime).big_integer().not_null())
                    .col(ColumnDef::new(Candles::Open).text().not_null())
                    .col(ColumnDef::new(Candles::High).text().not_null())
                    .col(ColumnDef::new(Candles::Low).text().not_null())
                    .col(ColumnDef::new(Candles::Close).text().not_null())
                    .col(ColumnDef::new(Candles::Volume).text().not_null())
                    .col(ColumnDef::new(Candles::TradeCount).big_integer().null())
                    .col(ColumnDef::new(Candles::FetchedAt).timestamp_with_time_zone().not_null())
                    .primary_key(
                        Index::create()
                            .name("pk_candles")
                            .col(Candles::Symbol)
                            .col(Candles::Interval)
                            .col(Candles::OpenTime),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Candles::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Candles {
    Table,
    Symbol,
    Interval,
    OpenTime,
    CloseTime,
    Open,
    High,
    Low,
    Close,
    Volume,
    TradeCount,
    FetchedAt,
}
