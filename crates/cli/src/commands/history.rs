use sizer_chat::cards;
use sizer_core::UserId;
use sizer_db::repositories::{
    CalculationRepository, PaymentRepository, SqlCalculationRepository, SqlPaymentRepository,
};

use crate::commands::{block_on, exit, load_config, open_database, CommandResult};

/// Renders the same two history cards the bot sends for `/history`.
pub fn run(user_id: i64, limit: u32) -> CommandResult {
    let config = match load_config("history") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let result = match block_on("history", async {
        let pool = open_database(&config).await?;
        let user = UserId(user_id);
        let calculations = SqlCalculationRepository::new(pool.clone())
            .load_history(user, limit)
            .await
            .map_err(|error| ("db_query", error.to_string(), exit::DATABASE))?;
        let payments = SqlPaymentRepository::new(pool.clone())
            .list_for_user(user, limit)
            .await
            .map_err(|error| ("db_query", error.to_string(), exit::DATABASE))?;
        pool.close().await;

        Ok::<String, (&'static str, String, u8)>(format!(
            "{}\n\n{}",
            cards::calculation_history(&calculations).text,
            cards::payment_history(&payments).text
        ))
    }) {
        Ok(result) => result,
        Err(failure) => return failure,
    };

    match result {
        Ok(report) => CommandResult::success("history", report),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("history", error_class, message, exit_code)
        }
    }
}
