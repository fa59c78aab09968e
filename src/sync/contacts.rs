use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::identity::normalize_phone;
use crate::models::Contact;
use crate::source::ContactSource;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactSyncReport {
    pub imported: usize,
    pub sources_read: usize,
    /// Labels of sources that could not be read.
    pub skipped_sources: Vec<String>,
    /// Set when the contact table itself could not be replaced.
    pub failed: Option<String>,
}

pub(super) fn sync_contacts(
    conn: &mut Connection,
    sources: &[Box<dyn ContactSource>],
    country_code: &str,
) -> ContactSyncReport {
    let mut report = ContactSyncReport::default();
    let mut contacts: Vec<Contact> = Vec::new();
    for source in sources {
        match source.read_contacts() {
            Ok(entries) => {
                report.sources_read += 1;
                contacts.extend(entries.into_iter().filter_map(|entry| {
                    let phone_normalized = normalize_phone(&entry.phone, country_code)?;
                    Some(Contact {
                        phone_normalized,
                        name: entry.name,
                        organization: entry.organization,
                        phone_raw: entry.phone,
                    })
                }));
            }
            Err(err) => {
                warn!(source = %source.label(), error = %err, "skipping unreadable contact source");
                report.skipped_sources.push(source.label());
            }
        }
    }

    match replace_contacts(conn, &contacts) {
        Ok(imported) => {
            report.imported = imported;
            debug!(imported, sources = report.sources_read, "contacts replaced");
        }
        Err(err) => {
            warn!(error = %err, "contact table replacement failed");
            report.failed = Some(err.to_string());
        }
    }
    report
}

/// Clears the table and reloads it. Books listing the same number merge;
/// the first non-blank name and organization win.
fn replace_contacts(conn: &mut Connection, contacts: &[Contact]) -> Result<usize, CoreError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM contacts;", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO contacts (phone_normalized, name, organization, phone_raw) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(phone_normalized) DO UPDATE SET \
               name = COALESCE(NULLIF(trim(contacts.name), ''), excluded.name), \
               organization = COALESCE(NULLIF(trim(contacts.organization), ''), excluded.organization);",
        )?;
        for contact in contacts {
            stmt.execute(params![
                contact.phone_normalized,
                contact.name,
                contact.organization,
                contact.phone_raw
            ])?;
        }
    }
    let imported: i64 = tx.query_row("SELECT COUNT(1) FROM contacts;", [], |row| row.get(0))?;
    tx.commit()?;
    Ok(imported as usize)
}
