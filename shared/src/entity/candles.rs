//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

/// One cached OHLCV bar. Prices and volume are stored as decimal text.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "candles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub symbol: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub interval: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub open_time: i64,
    pub close_time: i64,
    #[sea_orm(column_type = "Text")]
    pub open: String,
    #[sea_orm(column_type = "Text")]
    pub high: String,
    #[sea_orm(column_type = "Text")]
    pub low: String,
    #[sea_orm(column_type = "Text")]
    pub close: String,
    #[sea_orm(column_type = "Text")]
    pub volume: String,
    pub trade_count: Option<i64>,
    pub fetched_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
