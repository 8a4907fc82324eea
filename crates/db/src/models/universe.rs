use universe_core::{Universe, UniverseDetails};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UniverseRow {
    pub universe_uuid: String,
    pub name: String,
    pub version: i64,
    pub details: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UniverseRow {
    pub fn into_domain(self) -> Result<Universe, DbError> {
        let universe_uuid = Uuid::parse_str(&self.universe_uuid)
            .map_err(|e| DbError::CorruptRow(format!("universe_uuid {}: {e}", self.universe_uuid)))?;
        let details: UniverseDetails = serde_json::from_str(&self.details)?;

        Ok(Universe {
            universe_uuid,
            name: self.name,
            version: self.version,
            details,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        })
    }

    pub fn from_domain(universe: &Universe) -> Result<Self, DbError> {
        Ok(Self {
            universe_uuid: universe.universe_uuid.to_string(),
            name: universe.name.clone(),
            version: universe.version,
            details: serde_json::to_string(&universe.details)?,
            created_at: datetime_to_timestamp(universe.created_at),
            updated_at: datetime_to_timestamp(universe.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use universe_core::NodeDetails;

    #[test]
    fn test_row_conversion_keeps_details() {
        let universe = Universe::new("u1", vec![NodeDetails::new("n1").master()]).paused();
        let row = UniverseRow::from_domain(&universe).unwrap();
        let back = row.into_domain().unwrap();

        assert_eq!(back.universe_uuid, universe.universe_uuid);
        assert_eq!(back.details, universe.details);
    }

    #[test]
    fn test_corrupt_uuid_is_reported() {
        let row = UniverseRow {
            universe_uuid: "not-a-uuid".to_string(),
            name: "u1".to_string(),
            version: 1,
            details: "{}".to_string(),
            created_at: 0,
            updated_at: 0,
        };

        assert!(matches!(row.into_domain(), Err(DbError::CorruptRow(_))));
    }
}
