//! Persistence for [`Case`] records and their proposals.
//!
//! A case and its proposal lists are always written together in one
//! transaction, guarded by the case's `version`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use lexbridge_shared::types::{CaseId, ProposalKind, UserId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Case, Proposal};
use crate::rows::{enum_at, opt_time_at, opt_user_at, time_at, user_at, uuid_at};

const CASE_COLUMNS: &str =
    "id, kind, owner, title, assigned_lawyer, status, version, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new case together with any proposals it already carries.
    pub fn insert_case(&self, case: &Case) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO cases (id, kind, owner, title, assigned_lawyer, status, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                case.id.to_string(),
                case.kind.as_str(),
                case.owner.to_string(),
                case.title,
                case.assigned_lawyer.map(|l| l.to_string()),
                case.status.as_str(),
                case.version,
                case.created_at.to_rfc3339(),
                case.updated_at.to_rfc3339(),
            ],
        )?;
        for proposal in case.proposals() {
            upsert_proposal(&tx, case.id, proposal)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a case with both proposal lists.
    pub fn get_case(&self, id: CaseId) -> Result<Case> {
        let mut case = self
            .conn()
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1"),
                params![id.to_string()],
                row_to_case,
            )
            .map_err(not_found)?;
        load_proposals(self.conn(), &mut case)?;
        Ok(case)
    }

    /// Cases the user owns, is assigned to, or has a proposal on.
    pub fn find_cases_by_participant(&self, user: UserId) -> Result<Vec<Case>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CASE_COLUMNS} FROM cases
             WHERE owner = ?1
                OR assigned_lawyer = ?1
                OR id IN (SELECT case_id FROM proposals WHERE proposer = ?1 OR counterpart = ?1)
             ORDER BY updated_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_case)?;

        let mut cases = Vec::new();
        for row in rows {
            let mut case = row?;
            load_proposals(self.conn(), &mut case)?;
            cases.push(case);
        }
        Ok(cases)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Write back a case and all its proposals if nobody else has written it
    /// since `expected_version` was read.
    ///
    /// Returns the new version. Fails with [`StoreError::Conflict`] when the
    /// stored version moved on, and [`StoreError::NotFound`] when the case is
    /// gone. Either way nothing is written.
    pub fn save_case(&self, case: &Case, expected_version: i64) -> Result<i64> {
        let tx = self.conn().unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE cases
             SET title = ?1, assigned_lawyer = ?2, status = ?3,
                 version = version + 1, updated_at = ?4
             WHERE id = ?5 AND version = ?6",
            params![
                case.title,
                case.assigned_lawyer.map(|l| l.to_string()),
                case.status.as_str(),
                Utc::now().to_rfc3339(),
                case.id.to_string(),
                expected_version,
            ],
        )?;

        if updated == 0 {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT version FROM cases WHERE id = ?1",
                    params![case.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match exists {
                Some(_) => StoreError::Conflict {
                    expected: expected_version,
                },
                None => StoreError::NotFound,
            });
        }

        for proposal in case.proposals() {
            upsert_proposal(&tx, case.id, proposal)?;
        }

        tx.commit()?;
        Ok(expected_version + 1)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn upsert_proposal(conn: &Connection, case_id: CaseId, p: &Proposal) -> Result<()> {
    conn.execute(
        "INSERT INTO proposals
             (id, case_id, kind, proposer, counterpart, message, status, requested_at, responded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             responded_at = excluded.responded_at",
        params![
            p.id.to_string(),
            case_id.to_string(),
            p.kind.as_str(),
            p.proposer.to_string(),
            p.counterpart.to_string(),
            p.message,
            p.status.as_str(),
            p.requested_at.to_rfc3339(),
            p.responded_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn load_proposals(conn: &Connection, case: &mut Case) -> Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, proposer, counterpart, message, status, requested_at, responded_at
         FROM proposals
         WHERE case_id = ?1
         ORDER BY requested_at ASC, rowid ASC",
    )?;

    let rows = stmt.query_map(params![case.id.to_string()], row_to_proposal)?;

    case.offers.clear();
    case.requests.clear();
    for row in rows {
        let proposal = row?;
        match proposal.kind {
            ProposalKind::LawyerOffer => case.offers.push(proposal),
            ProposalKind::CitizenRequest => case.requests.push(proposal),
        }
    }
    Ok(())
}

/// Map a `cases` row to a [`Case`] with empty proposal lists.
fn row_to_case(row: &rusqlite::Row<'_>) -> rusqlite::Result<Case> {
    Ok(Case {
        id: CaseId(uuid_at(row, 0)?),
        kind: enum_at(row, 1)?,
        owner: user_at(row, 2)?,
        title: row.get(3)?,
        assigned_lawyer: opt_user_at(row, 4)?,
        status: enum_at(row, 5)?,
        offers: Vec::new(),
        requests: Vec::new(),
        version: row.get(6)?,
        created_at: time_at(row, 7)?,
        updated_at: time_at(row, 8)?,
    })
}

fn row_to_proposal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proposal> {
    Ok(Proposal {
        id: uuid_at(row, 0)?,
        kind: enum_at(row, 1)?,
        proposer: user_at(row, 2)?,
        counterpart: user_at(row, 3)?,
        message: row.get(4)?,
        status: enum_at(row, 5)?,
        requested_at: time_at(row, 6)?,
        responded_at: opt_time_at(row, 7)?,
    })
}
