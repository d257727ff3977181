use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{
        Client, ClientId, ClientSummary, Enrollment, EnrollmentId, EnrollmentStatus,
        HealthProgram, ProgramId, ProgramSummary,
    },
    protocol::{CreateClientRequest, CreateEnrollmentRequest, CreateProgramRequest},
};

/// Result of a write that can collide with the one-active-enrollment rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentWrite {
    Stored(Enrollment),
    DuplicateActive,
    NotFound,
}

/// Persistence seam for the registry. The HTTP layer only sees this trait.
#[async_trait]
pub trait RegistryRepository: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    async fn insert_program(&self, request: &CreateProgramRequest) -> Result<HealthProgram>;
    async fn list_programs(&self) -> Result<Vec<HealthProgram>>;
    async fn get_program(&self, program_id: &ProgramId) -> Result<Option<HealthProgram>>;

    async fn insert_client(&self, request: &CreateClientRequest) -> Result<Client>;
    async fn list_clients(&self) -> Result<Vec<Client>>;
    async fn search_clients(&self, query: &str) -> Result<Vec<Client>>;
    async fn get_client(&self, client_id: &ClientId) -> Result<Option<Client>>;

    async fn insert_enrollment(
        &self,
        client_id: &ClientId,
        request: &CreateEnrollmentRequest,
    ) -> Result<EnrollmentWrite>;
    async fn list_enrollments(&self) -> Result<Vec<Enrollment>>;
    async fn list_enrollments_for_client(&self, client_id: &ClientId) -> Result<Vec<Enrollment>>;
    async fn get_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Option<Enrollment>>;
    async fn update_enrollment_status(
        &self,
        enrollment_id: &EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<EnrollmentWrite>;
    /// Returns `false` when no enrollment with that id existed.
    async fn delete_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<bool>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.client_id, e.program_id, e.enrollment_date, e.status,
        c.first_name, c.last_name, p.name AS program_name
     FROM enrollments e
     INNER JOIN clients c ON c.id = e.client_id
     INNER JOIN programs p ON p.id = e.program_id";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens a separate database, so
        // the in-memory store is pinned to one long-lived connection.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn fetch_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Option<Enrollment>> {
        let row = sqlx::query(&format!("{ENROLLMENT_SELECT} WHERE e.id = ?"))
            .bind(enrollment_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load enrollment")?;
        row.as_ref().map(enrollment_from_row).transpose()
    }
}

#[async_trait]
impl RegistryRepository for Storage {
    async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn insert_program(&self, request: &CreateProgramRequest) -> Result<HealthProgram> {
        let program = HealthProgram {
            id: ProgramId::generate(),
            name: request.name.trim().to_string(),
            description: request.description.trim().to_string(),
            active: request.active,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO programs (id, name, description, active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(program.id.as_str())
        .bind(&program.name)
        .bind(&program.description)
        .bind(program.active)
        .bind(program.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert program")?;
        debug!(program_id = %program.id, "program stored");
        Ok(program)
    }

    async fn list_programs(&self) -> Result<Vec<HealthProgram>> {
        let rows = sqlx::query(
            "SELECT id, name, description, active, created_at FROM programs ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list programs")?;
        rows.iter().map(program_from_row).collect()
    }

    async fn get_program(&self, program_id: &ProgramId) -> Result<Option<HealthProgram>> {
        let row = sqlx::query(
            "SELECT id, name, description, active, created_at FROM programs WHERE id = ?",
        )
        .bind(program_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load program")?;
        row.as_ref().map(program_from_row).transpose()
    }

    async fn insert_client(&self, request: &CreateClientRequest) -> Result<Client> {
        let client = Client {
            id: ClientId::generate(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            date_of_birth: request.date_of_birth,
            gender: request.gender.trim().to_string(),
            contact_number: non_blank(request.contact_number.as_deref()),
            email: non_blank(request.email.as_deref()),
            address: non_blank(request.address.as_deref()),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO clients
                (id, first_name, last_name, date_of_birth, gender, contact_number, email, address, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(client.id.as_str())
        .bind(&client.first_name)
        .bind(&client.last_name)
        .bind(client.date_of_birth)
        .bind(&client.gender)
        .bind(client.contact_number.as_deref())
        .bind(client.email.as_deref())
        .bind(client.address.as_deref())
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert client")?;
        debug!(client_id = %client.id, "client stored");
        Ok(client)
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        let rows = sqlx::query(
            "SELECT id, first_name, last_name, date_of_birth, gender, contact_number, email, address, created_at
             FROM clients ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list clients")?;
        rows.iter().map(client_from_row).collect()
    }

    async fn search_clients(&self, query: &str) -> Result<Vec<Client>> {
        let query = query.trim();
        if query.is_empty() {
            return self.list_clients().await;
        }
        let pattern = like_pattern(query);
        let rows = sqlx::query(
            "SELECT id, first_name, last_name, date_of_birth, gender, contact_number, email, address, created_at
             FROM clients
             WHERE lower(first_name || ' ' || last_name) LIKE ? ESCAPE '\\'
                OR lower(coalesce(email, '')) LIKE ? ESCAPE '\\'
                OR lower(coalesce(contact_number, '')) LIKE ? ESCAPE '\\'
             ORDER BY rowid",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await
        .context("failed to search clients")?;
        rows.iter().map(client_from_row).collect()
    }

    async fn get_client(&self, client_id: &ClientId) -> Result<Option<Client>> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, date_of_birth, gender, contact_number, email, address, created_at
             FROM clients WHERE id = ?",
        )
        .bind(client_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load client")?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn insert_enrollment(
        &self,
        client_id: &ClientId,
        request: &CreateEnrollmentRequest,
    ) -> Result<EnrollmentWrite> {
        let enrollment_id = EnrollmentId::generate();
        let inserted = sqlx::query(
            "INSERT INTO enrollments (id, client_id, program_id, enrollment_date, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(enrollment_id.as_str())
        .bind(client_id.as_str())
        .bind(request.program_id.as_str())
        .bind(request.enrollment_date)
        .bind(request.status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(EnrollmentWrite::DuplicateActive),
            Err(err) if is_foreign_key_violation(&err) => return Ok(EnrollmentWrite::NotFound),
            Err(err) => return Err(err).context("failed to insert enrollment"),
        }

        debug!(%enrollment_id, %client_id, "enrollment stored");
        Ok(self
            .fetch_enrollment(&enrollment_id)
            .await?
            .map(EnrollmentWrite::Stored)
            .unwrap_or(EnrollmentWrite::NotFound))
    }

    async fn list_enrollments(&self) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query(&format!("{ENROLLMENT_SELECT} ORDER BY e.rowid"))
            .fetch_all(&self.pool)
            .await
            .context("failed to list enrollments")?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn list_enrollments_for_client(&self, client_id: &ClientId) -> Result<Vec<Enrollment>> {
        let rows = sqlx::query(&format!(
            "{ENROLLMENT_SELECT} WHERE e.client_id = ? ORDER BY e.rowid"
        ))
        .bind(client_id.as_str())
        .fetch_all(&self.pool)
        .await
        .context("failed to list client enrollments")?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn get_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<Option<Enrollment>> {
        self.fetch_enrollment(enrollment_id).await
    }

    async fn update_enrollment_status(
        &self,
        enrollment_id: &EnrollmentId,
        status: EnrollmentStatus,
    ) -> Result<EnrollmentWrite> {
        let updated = sqlx::query("UPDATE enrollments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(enrollment_id.as_str())
            .execute(&self.pool)
            .await;

        match updated {
            Ok(result) if result.rows_affected() == 0 => return Ok(EnrollmentWrite::NotFound),
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Ok(EnrollmentWrite::DuplicateActive),
            Err(err) => return Err(err).context("failed to update enrollment"),
        }

        Ok(self
            .fetch_enrollment(enrollment_id)
            .await?
            .map(EnrollmentWrite::Stored)
            .unwrap_or(EnrollmentWrite::NotFound))
    }

    async fn delete_enrollment(&self, enrollment_id: &EnrollmentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM enrollments WHERE id = ?")
            .bind(enrollment_id.as_str())
            .execute(&self.pool)
            .await
            .context("failed to delete enrollment")?;
        Ok(result.rows_affected() > 0)
    }
}

fn program_from_row(row: &SqliteRow) -> Result<HealthProgram> {
    Ok(HealthProgram {
        id: ProgramId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        active: row.try_get("active")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn client_from_row(row: &SqliteRow) -> Result<Client> {
    Ok(Client {
        id: ClientId(row.try_get("id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        date_of_birth: row.try_get::<NaiveDate, _>("date_of_birth")?,
        gender: row.try_get("gender")?,
        contact_number: row.try_get("contact_number")?,
        email: row.try_get("email")?,
        address: row.try_get("address")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn enrollment_from_row(row: &SqliteRow) -> Result<Enrollment> {
    let client_id = ClientId(row.try_get("client_id")?);
    let program_id = ProgramId(row.try_get("program_id")?);
    let status: String = row.try_get("status")?;
    Ok(Enrollment {
        id: EnrollmentId(row.try_get("id")?),
        enrollment_date: row.try_get::<NaiveDate, _>("enrollment_date")?,
        status: status
            .parse()
            .with_context(|| format!("corrupt status column '{status}'"))?,
        client: Some(ClientSummary {
            id: client_id.clone(),
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
        }),
        program: Some(ProgramSummary {
            id: program_id.clone(),
            name: row.try_get("program_name")?,
        }),
        client_id,
        program_id,
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
