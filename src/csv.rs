use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::is_goal_reached;
use crate::memory::UserProfile;
use crate::model::{CharityGoal, DonationMode, GoalId, PurchaseId, UserId};
use crate::{Money, Purchase};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: ::csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: ::csv::Error },

    #[error("line {line}: unrecognized donation mode '{mode}'")]
    UnrecognizedMode { line: usize, mode: String },

    #[error("line {line}: amount {amount} is negative")]
    NegativeAmount { line: usize, amount: Money },

    #[error("line {line}: amount {amount} is not a valid money value")]
    InvalidAmount { line: usize, amount: f64 },

    #[error("failed to write row: {0}")]
    Write(#[from] ::csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct UserRow {
    user: UserId,
    mode: String,
    enabled: bool,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoalRow {
    user: UserId,
    goal: GoalId,
    charity: String,
    name: String,
    goal_amount: f64,
    current_amount: f64,
    priority: u32,
}

#[derive(Debug, Deserialize)]
struct PurchaseRow {
    user: UserId,
    purchase: PurchaseId,
    amount: f64,
}

#[derive(Debug, Serialize)]
struct GoalOutputRow {
    user: UserId,
    goal: GoalId,
    charity: String,
    goal_amount: String,
    current_amount: String,
    priority: u32,
    completed: bool,
}

/// Deserialize every row of a csv file, tagging each with its line number
fn read_rows<R: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = (usize, Result<R, CsvError>)>, CsvError> {
    let path = path.as_ref();
    let reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<R>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            (line, result.map_err(|source| CsvError::Parse { line, source }))
        }))
}

fn money(line: usize, amount: f64) -> Result<Money, CsvError> {
    Money::try_from_float(amount).ok_or(CsvError::InvalidAmount { line, amount })
}

/// Read user preferences from a csv file
pub fn read_users(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<UserProfile, CsvError>>, CsvError> {
    Ok(read_rows::<UserRow>(path)?.map(|(line, row)| {
        let row = row?;
        let mode = row
            .mode
            .parse::<DonationMode>()
            .map_err(|_| CsvError::UnrecognizedMode {
                line,
                mode: row.mode.clone(),
            })?;
        Ok(UserProfile {
            id: row.user,
            mode,
            roundup_enabled: row.enabled,
            email: row.email.filter(|email| !email.is_empty()),
            primary_charity: None,
        })
    }))
}

/// Read existing charity goals from a csv file
pub fn read_goals(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<CharityGoal, CsvError>>, CsvError> {
    Ok(read_rows::<GoalRow>(path)?.map(|(line, row)| {
        let row = row?;
        let goal_amount = money(line, row.goal_amount)?;
        let current_amount = money(line, row.current_amount)?;
        for amount in [goal_amount, current_amount] {
            if amount < Money::ZERO {
                return Err(CsvError::NegativeAmount { line, amount });
            }
        }
        Ok(CharityGoal {
            id: row.goal,
            user: row.user,
            charity_id: row.charity,
            charity_name: row.name,
            goal_amount,
            current_amount: current_amount.min(goal_amount),
            priority: row.priority,
            is_completed: is_goal_reached(goal_amount, current_amount),
            seq: 0,
        })
    }))
}

/// Read purchases from a csv file. The sign of the amount is ignored.
pub fn read_purchases(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Purchase, CsvError>>, CsvError> {
    Ok(read_rows::<PurchaseRow>(path)?.map(|(line, row)| {
        let row = row?;
        let amount = money(line, row.amount)?;
        Ok(Purchase::new(row.purchase, row.user, amount))
    }))
}

/// Write charity goals to `out` in csv format
pub fn write_goals(
    goals: impl IntoIterator<Item = CharityGoal>,
    out: impl io::Write,
) -> Result<(), CsvError> {
    let mut writer = ::csv::Writer::from_writer(out);

    for goal in goals {
        let row = GoalOutputRow {
            user: goal.user,
            goal: goal.id,
            charity: goal.charity_id,
            goal_amount: goal.goal_amount.to_string(),
            current_amount: goal.current_amount.to_string(),
            priority: goal.priority,
            completed: goal.is_completed,
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
