use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{Result, ShieldError};
use crate::models::{
    Contact, ContactUpdate, Direction, InsertOutcome, Message, MessageStatus, NewContact, NewMessage, PageCursor,
    StoreStats, TrustStatus,
};
use crate::schema::{app_state, contacts, messages};
use crate::validation::{normalize_address, InputValidator};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Message store backed by a pooled SQLite database.
///
/// Cloning is cheap and shares the pool, so one instance is built at startup
/// and handed to every collaborator.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at `database_url` with default pool settings
    pub fn new(database_url: &str) -> Result<Self> {
        Self::open(database_url, &DatabaseConfig::default())
    }

    /// Open (or create) the database with explicit pool settings
    pub fn open(database_url: &str, config: &DatabaseConfig) -> Result<Self> {
        let path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| Self::configure(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .build(manager)?;

        let conn = pool.get()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::run_migrations(&conn)?;

        info!(path, max_connections = config.max_connections, "Message store opened");
        Ok(Self { pool })
    }

    /// Single-connection in-memory store. The connection is never recycled,
    /// since recycling would discard the data.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| Self::configure(conn, Duration::from_secs(5)));
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        Ok(Self { pool })
    }

    fn configure(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(())
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!("../migrations/2025-06-01-000000_create_tables/up.sql"))?;
        conn.execute_batch(include_str!("../migrations/2025-06-01-000001_add_app_state/up.sql"))?;
        debug!("Migrations applied");
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    fn message_columns() -> String {
        format!(
            "{}, {}, {}, {}, {}, {}, {}",
            messages::ID,
            messages::CONTACT_ID,
            messages::CONTENT,
            messages::TIMESTAMP,
            messages::DIRECTION,
            messages::STATUS,
            messages::PHONE_NUMBER
        )
    }

    fn contact_columns() -> String {
        format!(
            "{}, {}, {}, {}",
            contacts::ID,
            contacts::NAME,
            contacts::PHONE_NUMBER,
            contacts::STATUS
        )
    }

    /// Map a database row to a Message
    fn map_message(row: &Row) -> rusqlite::Result<Message> {
        Ok(Message {
            id: row.get(messages::ID)?,
            contact_id: row.get(messages::CONTACT_ID)?,
            content: row.get(messages::CONTENT)?,
            timestamp: row.get(messages::TIMESTAMP)?,
            direction: row.get(messages::DIRECTION)?,
            status: row.get(messages::STATUS)?,
            phone_number: row.get(messages::PHONE_NUMBER)?,
        })
    }

    /// Map a database row to a Contact
    fn map_contact(row: &Row) -> rusqlite::Result<Contact> {
        Ok(Contact {
            id: row.get(contacts::ID)?,
            name: row.get(contacts::NAME)?,
            phone_number: row.get(contacts::PHONE_NUMBER)?,
            status: row.get(contacts::STATUS)?,
        })
    }

    fn query_messages(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Message>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::map_message)?;

        let mut results = Vec::new();
        for message in rows {
            results.push(message?);
        }
        Ok(results)
    }

    fn query_contacts(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Contact>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::map_contact)?;

        let mut results = Vec::new();
        for contact in rows {
            results.push(contact?);
        }
        Ok(results)
    }

    // -- messages -------------------------------------------------------------

    /// Insert a message unless its dedup key is already stored.
    ///
    /// Returns the id of the stored row either way; a duplicate key never
    /// surfaces as an error.
    pub fn insert_message(&self, new_message: &NewMessage) -> Result<InsertOutcome> {
        let conn = self.get_connection()?;
        let phone_number = normalize_address(&new_message.phone_number);

        let inserted = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT ({}, {}, {}) DO NOTHING",
                messages::TABLE,
                messages::CONTACT_ID,
                messages::CONTENT,
                messages::TIMESTAMP,
                messages::DIRECTION,
                messages::STATUS,
                messages::PHONE_NUMBER,
                messages::PHONE_NUMBER,
                messages::TIMESTAMP,
                messages::CONTENT
            ),
            params![
                new_message.contact_id,
                new_message.content,
                new_message.timestamp,
                new_message.direction,
                new_message.initial_status(),
                phone_number
            ],
        )?;

        if inserted == 1 {
            return Ok(InsertOutcome {
                id: conn.last_insert_rowid(),
                created: true,
            });
        }

        let id: i64 = conn.query_row(
            &format!(
                "SELECT {} FROM {} WHERE {} = ? AND {} = ? AND {} = ?",
                messages::ID,
                messages::TABLE,
                messages::PHONE_NUMBER,
                messages::TIMESTAMP,
                messages::CONTENT
            ),
            params![phone_number, new_message.timestamp, new_message.content],
            |row| row.get(0),
        )?;

        debug!(message_id = id, "Duplicate message ignored");
        Ok(InsertOutcome { id, created: false })
    }

    /// Get a message by ID
    pub fn get_message(&self, message_id: i64) -> Result<Option<Message>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    Self::message_columns(),
                    messages::TABLE,
                    messages::ID
                ),
                params![message_id],
                Self::map_message,
            )
            .optional()?;

        Ok(message)
    }

    /// Unconditionally write a status. This is the explicit override path;
    /// the pipeline uses [`Database::mark_classified`] instead.
    pub fn update_status(&self, message_id: i64, status: MessageStatus) -> Result<bool> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ?",
                messages::TABLE,
                messages::STATUS,
                messages::ID
            ),
            params![status, message_id],
        )?;
        Ok(changed == 1)
    }

    /// Move a message out of `unchecked`. Returns false when the row is gone
    /// or already carries a final status, leaving it untouched.
    pub fn mark_classified(&self, message_id: i64, status: MessageStatus) -> Result<bool> {
        if status == MessageStatus::Unchecked {
            return Err(ShieldError::InvalidInput(
                "classification must produce safe or spam".into(),
            ));
        }

        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ? WHERE {} = ? AND {} = ?",
                messages::TABLE,
                messages::STATUS,
                messages::ID,
                messages::STATUS
            ),
            params![status, message_id, MessageStatus::Unchecked],
        )?;
        Ok(changed == 1)
    }

    /// Messages ordered newest first. Ties on the source timestamp are broken
    /// by insertion sequence so a static store pages deterministically.
    pub fn page(&self, offset: usize, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM {} ORDER BY {} DESC, {} DESC LIMIT ? OFFSET ?",
                Self::message_columns(),
                messages::TABLE,
                messages::TIMESTAMP,
                messages::ID
            ),
            params![to_sql_int(limit), to_sql_int(offset)],
        )
    }

    /// Keyset page: messages strictly after `cursor` in timeline order.
    ///
    /// Rows inserted after the cursor was taken never shift already returned
    /// rows, unlike offset paging.
    pub fn page_after(&self, cursor: Option<PageCursor>, limit: usize) -> Result<Vec<Message>> {
        let Some(cursor) = cursor else {
            return self.page(0, limit);
        };

        self.query_messages(
            &format!(
                "SELECT {cols} FROM {table}
                 WHERE {ts} < ?1 OR ({ts} = ?1 AND {id} < ?2)
                 ORDER BY {ts} DESC, {id} DESC LIMIT ?3",
                cols = Self::message_columns(),
                table = messages::TABLE,
                ts = messages::TIMESTAMP,
                id = messages::ID
            ),
            params![cursor.timestamp, cursor.id, to_sql_int(limit)],
        )
    }

    /// Most recent message exchanged with a contact
    pub fn latest_for_contact(&self, contact_id: i64) -> Result<Option<Message>> {
        let conn = self.get_connection()?;

        let message = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ? ORDER BY {} DESC, {} DESC LIMIT 1",
                    Self::message_columns(),
                    messages::TABLE,
                    messages::CONTACT_ID,
                    messages::TIMESTAMP,
                    messages::ID
                ),
                params![contact_id],
                Self::map_message,
            )
            .optional()?;

        Ok(message)
    }

    /// Conversation with a contact in chronological order
    pub fn messages_for_contact(&self, contact_id: i64) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM {} WHERE {} = ? ORDER BY {} ASC, {} ASC",
                Self::message_columns(),
                messages::TABLE,
                messages::CONTACT_ID,
                messages::TIMESTAMP,
                messages::ID
            ),
            params![contact_id],
        )
    }

    /// Number of messages exchanged with a contact
    pub fn message_count_for_contact(&self, contact_id: i64) -> Result<usize> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                messages::TABLE,
                messages::CONTACT_ID
            ),
            params![contact_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Messages with a given status, newest first
    pub fn messages_by_status(&self, status: MessageStatus, limit: usize) -> Result<Vec<Message>> {
        self.query_messages(
            &format!(
                "SELECT {} FROM {} WHERE {} = ? ORDER BY {} DESC, {} DESC LIMIT ?",
                Self::message_columns(),
                messages::TABLE,
                messages::STATUS,
                messages::TIMESTAMP,
                messages::ID
            ),
            params![status, to_sql_int(limit)],
        )
    }

    /// Substring search over message content, newest first
    pub fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<Message>> {
        let pattern = format!("%{}%", escape_like(query));
        self.query_messages(
            &format!(
                "SELECT {} FROM {} WHERE {} LIKE ? ESCAPE '\\' ORDER BY {} DESC, {} DESC LIMIT ?",
                Self::message_columns(),
                messages::TABLE,
                messages::CONTENT,
                messages::TIMESTAMP,
                messages::ID
            ),
            params![pattern, to_sql_int(limit)],
        )
    }

    /// Oldest unchecked incoming messages whose contact is not blocked
    pub fn oldest_unchecked_incoming(&self, limit: usize) -> Result<Vec<Message>> {
        let columns = Self::message_columns()
            .split(", ")
            .map(|column| format!("m.{column}"))
            .collect::<Vec<_>>()
            .join(", ");

        self.query_messages(
            &format!(
                "SELECT {columns} FROM {mt} m JOIN {ct} c ON c.{cid} = m.{mcid}
                 WHERE m.{status} = ? AND m.{direction} = ? AND c.{cstatus} != ?
                 ORDER BY m.{ts} ASC, m.{mid} ASC LIMIT ?",
                mt = messages::TABLE,
                ct = contacts::TABLE,
                cid = contacts::ID,
                mcid = messages::CONTACT_ID,
                status = messages::STATUS,
                direction = messages::DIRECTION,
                cstatus = contacts::STATUS,
                ts = messages::TIMESTAMP,
                mid = messages::ID
            ),
            params![
                MessageStatus::Unchecked,
                Direction::Incoming,
                TrustStatus::Blocked,
                to_sql_int(limit)
            ],
        )
    }

    /// Delete a message, returning the removed row
    pub fn delete_message(&self, message_id: i64) -> Result<Option<Message>> {
        let Some(message) = self.get_message(message_id)? else {
            return Ok(None);
        };

        let conn = self.get_connection()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?", messages::TABLE, messages::ID),
            params![message_id],
        )?;
        Ok(Some(message))
    }

    // -- contacts -------------------------------------------------------------

    /// Get a contact by ID
    pub fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>> {
        let conn = self.get_connection()?;

        let contact = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    Self::contact_columns(),
                    contacts::TABLE,
                    contacts::ID
                ),
                params![contact_id],
                Self::map_contact,
            )
            .optional()?;

        Ok(contact)
    }

    /// Get a contact by phone number or sender id (normalized before comparison)
    pub fn get_contact_by_phone(&self, phone_number: &str) -> Result<Option<Contact>> {
        let conn = self.get_connection()?;

        let contact = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    Self::contact_columns(),
                    contacts::TABLE,
                    contacts::PHONE_NUMBER
                ),
                params![normalize_address(phone_number)],
                Self::map_contact,
            )
            .optional()?;

        Ok(contact)
    }

    /// Find the contact for an address, creating it with `status` when absent.
    /// Alphanumeric sender ids are stored as written.
    ///
    /// Creation is atomic on the unique phone number, so concurrent callers
    /// for the same number end up with the same row. The flag is true when
    /// this call created it.
    pub fn resolve_or_create_contact(
        &self,
        phone_number: &str,
        name: Option<&str>,
        status: TrustStatus,
    ) -> Result<(Contact, bool)> {
        let phone_number = normalize_address(phone_number);
        if phone_number.is_empty() {
            return Err(ShieldError::InvalidInput("cannot create a contact without an address".into()));
        }

        let display_name = name
            .map(InputValidator::sanitize_text)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| phone_number.clone());

        let conn = self.get_connection()?;
        let created = conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?) ON CONFLICT ({}) DO NOTHING",
                contacts::TABLE,
                contacts::NAME,
                contacts::PHONE_NUMBER,
                contacts::STATUS,
                contacts::PHONE_NUMBER
            ),
            params![display_name, phone_number, status],
        )? == 1;
        drop(conn);

        let contact = self
            .get_contact_by_phone(&phone_number)?
            .ok_or_else(|| ShieldError::NotFound(format!("contact {phone_number}")))?;

        if created {
            info!(contact_id = contact.id, phone = %contact.phone_number, "Contact created");
        }
        Ok((contact, created))
    }

    /// Add a new contact; fails if the number is already stored
    pub fn add_contact(&self, new_contact: &NewContact) -> Result<Contact> {
        InputValidator::validate_contact_name(&new_contact.name)?;
        let phone_number = InputValidator::validate_phone(&new_contact.phone_number)?;

        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                contacts::TABLE,
                contacts::NAME,
                contacts::PHONE_NUMBER,
                contacts::STATUS
            ),
            params![new_contact.name.trim(), phone_number, new_contact.status],
        )
        .map_err(|e| map_unique_violation(e, &phone_number))?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_contact(id)?
            .ok_or_else(|| ShieldError::NotFound(format!("contact {id}")))
    }

    /// Apply a partial edit to a contact
    pub fn update_contact(&self, contact_id: i64, update: &ContactUpdate) -> Result<Contact> {
        let mut update_fields = Vec::new();
        let mut update_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &update.name {
            InputValidator::validate_contact_name(name)?;
            update_fields.push(format!("{} = ?", contacts::NAME));
            update_params.push(Box::new(name.trim().to_string()));
        }

        let mut new_phone = None;
        if let Some(phone) = &update.phone_number {
            let normalized = InputValidator::validate_phone(phone)?;
            update_fields.push(format!("{} = ?", contacts::PHONE_NUMBER));
            update_params.push(Box::new(normalized.clone()));
            new_phone = Some(normalized);
        }

        if let Some(status) = update.status {
            update_fields.push(format!("{} = ?", contacts::STATUS));
            update_params.push(Box::new(status));
        }

        if !update_fields.is_empty() {
            update_params.push(Box::new(contact_id));
            let query = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                contacts::TABLE,
                update_fields.join(", "),
                contacts::ID
            );

            let conn = self.get_connection()?;
            let changed = conn
                .execute(&query, rusqlite::params_from_iter(update_params.iter()))
                .map_err(|e| map_unique_violation(e, new_phone.as_deref().unwrap_or_default()))?;
            if changed == 0 {
                return Err(ShieldError::NotFound(format!("contact {contact_id}")));
            }
        }

        self.get_contact(contact_id)?
            .ok_or_else(|| ShieldError::NotFound(format!("contact {contact_id}")))
    }

    /// Change a contact's trust status
    pub fn set_contact_status(&self, contact_id: i64, status: TrustStatus) -> Result<Contact> {
        self.update_contact(
            contact_id,
            &ContactUpdate {
                status: Some(status),
                ..ContactUpdate::default()
            },
        )
    }

    /// Delete a contact and, through the foreign key, all of its messages
    pub fn delete_contact(&self, contact_id: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE {} = ?", contacts::TABLE, contacts::ID),
            params![contact_id],
        )?;
        Ok(removed == 1)
    }

    /// All contacts ordered by name
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "SELECT {} FROM {} ORDER BY {} COLLATE NOCASE ASC",
                Self::contact_columns(),
                contacts::TABLE,
                contacts::NAME
            ),
            [],
        )
    }

    /// Contacts with a given trust status
    pub fn contacts_by_status(&self, status: TrustStatus) -> Result<Vec<Contact>> {
        self.query_contacts(
            &format!(
                "SELECT {} FROM {} WHERE {} = ? ORDER BY {} COLLATE NOCASE ASC",
                Self::contact_columns(),
                contacts::TABLE,
                contacts::STATUS,
                contacts::NAME
            ),
            params![status],
        )
    }

    /// Contacts whose name or number contains `query`
    pub fn search_contacts(&self, query: &str) -> Result<Vec<Contact>> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        self.query_contacts(
            &format!(
                "SELECT {} FROM {} WHERE {} LIKE ?1 ESCAPE '\\' OR {} LIKE ?1 ESCAPE '\\'
                 ORDER BY {} COLLATE NOCASE ASC",
                Self::contact_columns(),
                contacts::TABLE,
                contacts::NAME,
                contacts::PHONE_NUMBER,
                contacts::NAME
            ),
            params![pattern],
        )
    }

    /// Merge directory display names into stored contacts.
    ///
    /// `snapshot` maps normalized numbers to names. Matching contacts take the
    /// directory name, and `unknown` ones become `known`; blocked contacts keep
    /// their status. Returns the number of contacts changed.
    pub fn merge_directory_names(&self, snapshot: &HashMap<String, String>) -> Result<usize> {
        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;
        let mut changed = 0;

        {
            let mut select = tx.prepare(&format!(
                "SELECT {} FROM {}",
                Self::contact_columns(),
                contacts::TABLE
            ))?;
            let stored = select
                .query_map([], Self::map_contact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut update = tx.prepare(&format!(
                "UPDATE {} SET {} = ?, {} = ? WHERE {} = ?",
                contacts::TABLE,
                contacts::NAME,
                contacts::STATUS,
                contacts::ID
            ))?;

            for contact in stored {
                let Some(name) = snapshot.get(&contact.phone_number) else {
                    continue;
                };
                let name = InputValidator::sanitize_text(name);
                if name.is_empty() {
                    continue;
                }

                let status = match contact.status {
                    TrustStatus::Unknown => TrustStatus::Known,
                    other => other,
                };

                if name != contact.name || status != contact.status {
                    update.execute(params![name, status, contact.id])?;
                    changed += 1;
                }
            }
        }

        tx.commit()?;
        Ok(changed)
    }

    // -- application state ----------------------------------------------------

    /// Read an application state value
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let value = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ?",
                    app_state::VALUE,
                    app_state::TABLE,
                    app_state::KEY
                ),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write an application state value
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}) VALUES (?, ?) ON CONFLICT ({}) DO UPDATE SET {} = excluded.{}",
                app_state::TABLE,
                app_state::KEY,
                app_state::VALUE,
                app_state::KEY,
                app_state::VALUE,
                app_state::VALUE
            ),
            params![key, value],
        )?;
        Ok(())
    }

    /// Aggregate counts of messages and contacts
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_connection()?;

        let (total, unchecked, safe, spam): (i64, i64, i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN {s} = 'unchecked' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN {s} = 'safe' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN {s} = 'spam' THEN 1 ELSE 0 END), 0)
                 FROM {t}",
                s = messages::STATUS,
                t = messages::TABLE
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let (total_contacts, blocked): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN {s} = 'blocked' THEN 1 ELSE 0 END), 0) FROM {t}",
                s = contacts::STATUS,
                t = contacts::TABLE
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let count = |n: i64| usize::try_from(n).unwrap_or_default();
        Ok(StoreStats {
            total_messages: count(total),
            unchecked: count(unchecked),
            safe: count(safe),
            spam: count(spam),
            total_contacts: count(total_contacts),
            blocked_contacts: count(blocked),
        })
    }
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn escape_like(query: &str) -> String {
    query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn map_unique_violation(err: rusqlite::Error, phone_number: &str) -> ShieldError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _) if failure.code == ErrorCode::ConstraintViolation => {
            ShieldError::InvalidInput(format!("a contact with number {phone_number} already exists"))
        },
        other => ShieldError::Database(other),
    }
}
