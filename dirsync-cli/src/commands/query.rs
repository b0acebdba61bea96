//! `dirsync get`, `dirsync list`, `dirsync resolve`: queries answered by the
//! running daemon.

use anyhow::{bail, Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use dirsync_core::Record;
use dirsync_daemon::{request_get, request_list, request_resolve};

use super::Invocation;

/// Arguments for `dirsync get`.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Surrogate key of the record.
    pub key: String,

    /// Include personal information.
    #[arg(long)]
    pub pii: bool,

    /// Emit the record as JSON.
    #[arg(long)]
    pub json: bool,
}

impl GetArgs {
    pub fn run(self, invocation: &Invocation) -> Result<()> {
        let record = request_get(&invocation.home, &self.key, self.pii)
            .with_context(|| format!("get failed for '{}'", self.key))?;
        match record {
            Some(record) => print_one(&record, self.json),
            None => bail!("no record for key '{}'", self.key),
        }
    }
}

/// Arguments for `dirsync resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Login name as the directory knows it (uid or sAMAccountName).
    pub id: String,

    /// Include personal information.
    #[arg(long)]
    pub pii: bool,

    /// Emit the record as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ResolveArgs {
    pub fn run(self, invocation: &Invocation) -> Result<()> {
        let record = request_resolve(&invocation.home, &self.id, self.pii)
            .with_context(|| format!("resolve failed for '{}'", self.id))?;
        match record {
            Some(record) => print_one(&record, self.json),
            None => bail!("no directory user '{}'", self.id),
        }
    }
}

/// Arguments for `dirsync list`.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include personal information.
    #[arg(long)]
    pub pii: bool,

    /// Emit one JSON record per line.
    #[arg(long)]
    pub json: bool,

    /// Stop after this many records.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

impl ListArgs {
    pub fn run(self, invocation: &Invocation) -> Result<()> {
        let listing = request_list(&invocation.home, self.pii).context("list failed")?;
        let limit = self.limit.unwrap_or(usize::MAX);

        // Dropping the listing before it is exhausted cancels it daemon-side.
        if self.json {
            for record in listing.take(limit) {
                let record = record.context("list failed")?;
                println!(
                    "{}",
                    serde_json::to_string(&record).context("failed to encode record")?
                );
            }
            return Ok(());
        }

        let records = listing
            .take(limit)
            .collect::<Result<Vec<_>, _>>()
            .context("list failed")?;
        if records.is_empty() {
            println!("No records.");
            return Ok(());
        }
        print_table(&records);
        println!("{} records", records.len());
        Ok(())
    }
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "username")]
    username: String,
    #[tabled(rename = "email")]
    email: String,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        let (username, email) = match &record.pii {
            Some(pii) => (pii.username.clone(), pii.email.clone()),
            None => ("-".to_string(), "-".to_string()),
        };
        Self {
            key: record.surrogate_key.to_string(),
            status: record.status.to_string(),
            source: record.source_kind.to_string(),
            username,
            email,
        }
    }
}

fn print_table(records: &[Record]) {
    let mut table = Table::new(records.iter().map(RecordRow::from));
    table.with(Style::rounded());
    println!("{table}");
}

fn print_one(record: &Record, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(record).context("failed to encode record")?
        );
        return Ok(());
    }

    print_table(std::slice::from_ref(record));
    if let Some(pii) = &record.pii {
        let fields = [
            ("source id", &pii.source_id),
            ("display name", &pii.display_name),
            ("first name", &pii.first_name),
            ("last name", &pii.last_name),
            ("phone", &pii.phone),
            ("department", &pii.department),
            ("title", &pii.title),
            ("manager", &pii.manager_id),
            ("employee id", &pii.employee_id),
            ("location", &pii.location),
        ];
        for (label, value) in fields.iter().filter(|(_, v)| !v.is_empty()) {
            println!("  {label:<13} {value}");
        }
        for attribute in &pii.attributes {
            println!("  {:<13} {}", attribute.key, attribute.value);
        }
    }
    Ok(())
}
