use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use sizer_core::domain::calculation::{
    CalculationId, CalculationRecord, NewCalculation, ParameterSet, SizingResult,
};
use sizer_core::domain::user::UserId;

use super::{column, format_timestamp, parse_flow, parse_timestamp, CalculationRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT id, user_id, service_type, input_params, result_params,
        ai_adjustments, additional_conditions, created_at
 FROM calculations";

pub struct SqlCalculationRepository {
    pool: DbPool,
}

impl SqlCalculationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_calculation(row: &SqliteRow) -> Result<CalculationRecord, RepositoryError> {
    let id: i64 = column(row, "id")?;
    let user_id: i64 = column(row, "user_id")?;
    let service_type: String = column(row, "service_type")?;
    let input_json: String = column(row, "input_params")?;
    let result_json: String = column(row, "result_params")?;
    let ai_adjustments: Option<String> = column(row, "ai_adjustments")?;
    let additional_conditions: Option<String> = column(row, "additional_conditions")?;
    let created_at: String = column(row, "created_at")?;

    let input_params: ParameterSet = serde_json::from_str(&input_json)
        .map_err(|error| RepositoryError::Decode(format!("input_params of #{id}: {error}")))?;
    let result: SizingResult = serde_json::from_str(&result_json)
        .map_err(|error| RepositoryError::Decode(format!("result_params of #{id}: {error}")))?;

    Ok(CalculationRecord {
        id: CalculationId(id),
        user_id: UserId(user_id),
        flow: parse_flow(&service_type)?,
        input_params,
        result,
        ai_adjustments,
        additional_conditions,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl CalculationRepository for SqlCalculationRepository {
    async fn save(
        &self,
        calculation: NewCalculation,
    ) -> Result<CalculationRecord, RepositoryError> {
        let input_json = serde_json::to_string(&calculation.input_params)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let result_json = serde_json::to_string(&calculation.result.to_json())
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let created_at = Utc::now();

        let outcome = sqlx::query(
            "INSERT INTO calculations (user_id, service_type, input_params, result_params,
                                       ai_adjustments, additional_conditions, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(calculation.user_id.0)
        .bind(calculation.flow.as_str())
        .bind(&input_json)
        .bind(&result_json)
        .bind(&calculation.ai_adjustments)
        .bind(&calculation.additional_conditions)
        .bind(format_timestamp(created_at))
        .execute(&self.pool)
        .await?;

        let id = CalculationId(outcome.last_insert_rowid());
        // Truncate to the stored precision.
        let created_at = parse_timestamp(&format_timestamp(created_at))?;
        Ok(CalculationRecord::from_new(id, calculation, created_at))
    }

    async fn find_for_user(
        &self,
        user_id: UserId,
        id: CalculationId,
    ) -> Result<Option<CalculationRecord>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ? AND user_id = ?"))
            .bind(id.0)
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_calculation).transpose()
    }

    async fn load_history(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<CalculationRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?"
        ))
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_calculation).collect()
    }
}
