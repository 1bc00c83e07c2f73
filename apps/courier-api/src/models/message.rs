use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sequence_number: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
    pub sequence_number: i32,
}
