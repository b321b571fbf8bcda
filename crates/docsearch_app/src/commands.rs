use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use client_logging::client_info;
use docsearch_client::models::{FileList, QueryAnswer};
use docsearch_client::{
    DocSearchClient, FinalAnswer, PollOutcome, ProgressSink, SourceRef, StreamUpdate,
};
use serde_json::Value;

use crate::cli::{Command, FilesCommand, QuestionArgs, SessionsCommand};

pub async fn run(client: &DocSearchClient, command: Command) -> Result<()> {
    match command {
        Command::Files { action } => files(client, action).await,
        Command::Sessions { action } => sessions(client, action).await,
        Command::Ask(args) => ask(client, args).await,
        Command::Query(args) => {
            let answer = client
                .query(args.session, &args.question, &args.files)
                .await
                .context("query failed")?;
            print_answer(&answer);
            Ok(())
        }
        Command::Suggest { keyword, limit } => {
            print_json(&client.suggestions(&keyword, limit).await?)
        }
        Command::Analytics { days } => print_json(&client.analytics(days).await?),
    }
}

async fn files(client: &DocSearchClient, action: FilesCommand) -> Result<()> {
    match action {
        FilesCommand::List { page, page_size } => {
            print_files(&client.list_files(page, page_size).await?);
        }
        FilesCommand::Search {
            keyword,
            page,
            page_size,
        } => {
            print_files(&client.search_files(&keyword, page, page_size).await?);
        }
        FilesCommand::Info { file_id } => print_json(&client.file_info(file_id).await?)?,
        FilesCommand::Status { file_id } => {
            let status = client.file_status(file_id).await?;
            println!("{} ({}%)", status.process_status, status.process_progress);
        }
        FilesCommand::Upload { path, watch } => {
            let receipt = client
                .upload_path(&path, Some(progress_printer()))
                .await
                .with_context(|| format!("uploading {}", path.display()))?;
            eprintln!();
            println!("uploaded {} as file {}", receipt.filename, receipt.file_id);
            if watch {
                watch_processing(client, receipt.file_id).await?;
            }
        }
        FilesCommand::Delete { file_id } => {
            client.delete_file(file_id).await?;
            println!("deleted file {file_id}");
        }
        FilesCommand::BatchDelete { file_ids } => {
            let report = client.batch_delete(&file_ids).await?;
            for result in &report.results {
                let mark = if result.success { "ok" } else { "failed" };
                println!("{:>8}  {:<6}  {}", result.file_id, mark, result.message);
            }
            println!("{}/{} deleted", report.success_count, report.total_count);
        }
        FilesCommand::Rename { file_id, new_name } => {
            client.rename_file(file_id, &new_name).await?;
            println!("renamed file {file_id} to {new_name}");
        }
    }
    Ok(())
}

async fn sessions(client: &DocSearchClient, action: SessionsCommand) -> Result<()> {
    match action {
        SessionsCommand::Create { name } => {
            let session = client.create_session(&name).await?;
            println!("created session {} ({})", session.session_id, session.session_name);
        }
        SessionsCommand::List => print_json(&client.list_sessions().await?)?,
        SessionsCommand::History {
            session_id,
            page,
            page_size,
        } => print_json(&client.session_history(session_id, page, page_size).await?)?,
        SessionsCommand::Delete { session_id } => {
            client.delete_session(session_id).await?;
            println!("deleted session {session_id}");
        }
        SessionsCommand::Rename {
            session_id,
            new_name,
        } => {
            client.rename_session(session_id, &new_name).await?;
            println!("renamed session {session_id} to {new_name}");
        }
    }
    Ok(())
}

async fn ask(client: &DocSearchClient, args: QuestionArgs) -> Result<()> {
    let subscription = client.stream_query(args.session, &args.question, &args.files)?;
    let mut printer = TranscriptPrinter::new(io::stdout());

    let answer: FinalAnswer = subscription
        .finish(|update| match update {
            StreamUpdate::Progress(message) => client_info!("{}", message),
            StreamUpdate::Transcript(text) => printer.show(&text),
            _ => {}
        })
        .await
        .context("streamed answer failed")?;
    printer.finish().context("writing answer to stdout")?;

    println!();
    print_sources(&answer.sources);
    Ok(())
}

/// Prints the growing transcript, writing only the part not yet shown.
///
/// The stream callback cannot fail, so the first write error is kept and
/// later output is skipped until `finish` reports it.
struct TranscriptPrinter<W: Write> {
    out: W,
    printed: usize,
    error: Option<io::Error>,
}

impl<W: Write> TranscriptPrinter<W> {
    fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            error: None,
        }
    }

    fn show(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        if let Some(fresh) = text.get(self.printed..) {
            let written = self
                .out
                .write_all(fresh.as_bytes())
                .and_then(|()| self.out.flush());
            if let Err(err) = written {
                self.error = Some(err);
                return;
            }
        }
        self.printed = text.len();
    }

    fn finish(self) -> io::Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn watch_processing(client: &DocSearchClient, file_id: u64) -> Result<()> {
    eprintln!("waiting for processing of file {file_id}...");
    match client.watch_processing(file_id, |_| {}).wait().await {
        PollOutcome::Completed => println!("file {file_id} processed"),
        PollOutcome::Failed => bail!("processing of file {file_id} failed"),
        PollOutcome::Unknown(err) => {
            bail!("lost track of file {file_id}: {err}")
        }
        PollOutcome::TimedOut => bail!("file {file_id} is still processing; check again later"),
        PollOutcome::Cancelled => bail!("stopped watching file {file_id}"),
    }
    Ok(())
}

fn progress_printer() -> Arc<dyn ProgressSink> {
    Arc::new(|percent: u8| eprint!("\ruploading... {percent:>3}%"))
}

fn print_files(list: &FileList) {
    for file in &list.files {
        let status = file
            .process_status
            .map(|state| state.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>8}  {:<10}  {:>10}  {}",
            file.id, status, file.file_size, file.original_name
        );
    }
    let page = &list.pagination;
    println!(
        "page {}/{} ({} files)",
        page.page, page.total_pages, page.total
    );
}

fn print_answer(answer: &QueryAnswer) {
    println!("{}", answer.answer);
    print_sources(&answer.sources);
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!("\nsources:");
    for source in sources {
        let pages = source
            .pages
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("  [{}] {} (pages {})", source.file_id, source.file_name, pages);
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
