//! Job entity as stored in PostgreSQL.

use sea_orm::entity::prelude::*;

/// Job entity model.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Remote item identifier.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Insertion sequence, used as claim order.
    pub seq: i64,
    /// Partition: NEW, FETCHING, FETCHED or DELETING.
    pub status: String,
    pub from_addr: String,
    pub to_addr: String,
    /// Creation time of the remote item, set once fetched.
    pub created: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
