use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::api::{MailApi, MailClient};
use crate::cli::{Cli, Command};
use crate::config::AppDefaults;
use crate::inbox::InboxController;
use crate::session::SessionStore;
use crate::types::{now_ms, Email, Session};

pub async fn run(cli: Cli) -> Result<()> {
    let defaults = AppDefaults::load()?;
    let api = Arc::new(MailClient::new(&defaults)?);
    let store = SessionStore::new();
    let controller = InboxController::new(
        api,
        store,
        Duration::from_secs(defaults.poll_interval_secs),
    );

    match cli.command {
        Command::Generate => {
            let session = controller.quick_register().await?;
            println!("Created throwaway inbox: {}", session.account.address);
            print_expiry(&session);
        }
        Command::Register { address, password } => {
            let session = controller.register(&address, &password).await?;
            println!("Registered {}", session.account.address);
            print_expiry(&session);
        }
        Command::Login { address, password } => {
            let session = controller.login(&address, &password).await?;
            println!("Signed in as {}", session.account.address);
            print_expiry(&session);
        }
        Command::Status => {
            require_session(&controller)?;
            if let Some(session) = controller.session() {
                let account = &session.account;
                println!("Address:  {}", account.address);
                println!("Quota:    {} / {} bytes", account.used, account.quota);
                let minutes_left = (session.expires_at - now_ms()).max(0) / 60_000;
                println!("Expires:  in ~{minutes_left} min");
            }
        }
        Command::Domains => {
            let domains = controller.domains().await?;
            if domains.is_empty() {
                println!("No active domains available.");
            }
            for d in domains {
                println!("{}", d.domain);
            }
        }
        Command::List => {
            require_session(&controller)?;
            controller.refresh().await?;
            print_summaries(&controller.emails());
        }
        Command::Watch => {
            require_session(&controller)?;
            watch_inbox(&controller).await?;
        }
        Command::Read { id } => {
            require_session(&controller)?;
            controller.refresh().await?;
            let email = controller.select_email(&id).await?;
            print_detail(&email);
        }
        Command::Source { id } => {
            require_session(&controller)?;
            let source = controller.message_source(&id).await?;
            println!("{source}");
        }
        Command::Delete { id } => {
            require_session(&controller)?;
            controller.delete_email(&id).await?;
            println!("Deleted {id}");
        }
        Command::Clear => {
            require_session(&controller)?;
            controller.refresh().await?;
            let count = controller.emails().len();
            controller.clear_all().await?;
            println!("Deleted {count} messages");
        }
        Command::Download { id, output } => {
            require_session(&controller)?;
            let bytes = controller.download_attachment(&id).await?;
            fs::write(&output, &bytes)
                .with_context(|| format!("writing attachment to {}", output.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
        }
        Command::Logout => {
            let _ = controller.restore();
            controller.logout();
            println!("Signed out.");
        }
        Command::DeleteAccount { yes } => {
            require_session(&controller)?;
            let address = controller
                .session()
                .map(|s| s.account.address)
                .unwrap_or_default();
            if !yes && !confirm(&format!("Delete account {address}? [y/N] "))? {
                println!("Aborted.");
                return Ok(());
            }
            controller.delete_account().await?;
            println!("Account {address} deleted.");
        }
    }

    Ok(())
}

fn require_session<A>(controller: &InboxController<A>) -> Result<()>
where
    A: MailApi + ?Sized + 'static,
{
    if controller.restore() {
        Ok(())
    } else {
        bail!("No active session. Run `burner generate` or `burner login` first.");
    }
}

async fn watch_inbox<A>(controller: &InboxController<A>) -> Result<()>
where
    A: MailApi + ?Sized + 'static,
{
    let mut updates = controller.subscribe();
    let address = controller
        .session()
        .map(|s| s.account.address)
        .unwrap_or_default();
    println!("Watching {address} (Ctrl-C to stop)");

    let mut printed: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                for email in &snapshot.emails {
                    if printed.insert(email.id.clone()) {
                        println!("{}", summary_line(email));
                    }
                }
                if !snapshot.polling {
                    println!("Session ended; stopping.");
                    break;
                }
            }
        }
    }

    controller.stop_polling();
    info!("Watch stopped");
    Ok(())
}

fn print_summaries(emails: &[Email]) {
    if emails.is_empty() {
        println!("Inbox is empty.");
        return;
    }
    for email in emails {
        println!("{}", summary_line(email));
    }
}

fn summary_line(email: &Email) -> String {
    let status = if email.seen { "R" } else { "U" };
    let clip = if email.has_attachments { "+" } else { " " };
    let mut preview = email.intro.replace(['\r', '\n'], " ");
    if preview.chars().count() > 60 {
        preview = preview.chars().take(60).collect::<String>() + "...";
    }
    format!(
        "[{}] [{}]{} {}  {}  from {}  ({})",
        format_date(&email.created_at),
        status,
        clip,
        email.id,
        email.subject,
        email.from.address,
        preview
    )
}

fn print_detail(email: &Email) {
    println!("Subject: {}", email.subject);
    println!("From:    {} <{}>", email.from.name, email.from.address);
    for to in &email.to {
        println!("To:      {}", to.address);
    }
    println!("Date:    {}", format_date(&email.created_at));
    println!();
    println!("{}", render_body(email));

    if let Some(attachments) = &email.attachments {
        if !attachments.is_empty() {
            println!();
            println!("Attachments:");
            for a in attachments {
                println!("  {}  {} ({}, {} bytes)", a.id, a.filename, a.content_type, a.size);
            }
        }
    }
}

fn render_body(email: &Email) -> String {
    if let Some(text) = &email.text {
        if !text.trim().is_empty() {
            return text.clone();
        }
    }
    if let Some(html) = &email.html {
        if let Some(first) = html.first() {
            if let Ok(rendered) = html2text::from_read(first.as_bytes(), 80) {
                return rendered;
            }
        }
    }
    email.intro.clone()
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M").to_string()
}

fn print_expiry(session: &Session) {
    let minutes = (session.expires_at - now_ms()).max(0) / 60_000;
    println!("Session valid for ~{minutes} min.");
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush().context("flushing prompt")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading confirmation")?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
