//! Interactive console over a running [`CsvDb`].

use super::output;
use anyhow::Result;
use csvdb::CsvDb;
use std::io::{self, BufRead, Write};

const PROMPT: &str = "csvdb> ";

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand<'a> {
    Empty,
    Quit,
    ShowTables,
    Describe(&'a str),
    Sql(&'a str),
}

impl<'a> ConsoleCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        match head.to_ascii_lowercase().as_str() {
            "" => ConsoleCommand::Empty,
            "quit" | "exit" if rest.is_empty() => ConsoleCommand::Quit,
            "show" if rest.is_empty() => ConsoleCommand::ShowTables,
            "dt" if !rest.is_empty() => ConsoleCommand::Describe(rest),
            _ => ConsoleCommand::Sql(line.trim_end_matches(';')),
        }
    }
}

/// Run the prompt loop until `quit`, `exit` or end of input.
pub fn run(db: &mut CsvDb) -> Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", PROMPT);
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => {
                println!();
                break;
            }
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Empty => {}
            ConsoleCommand::Quit => break,
            ConsoleCommand::ShowTables => output::print_tables(&db.show_tables()),
            ConsoleCommand::Describe(name) => match db.describe_table(name) {
                Ok(columns) => output::print_columns(&columns),
                Err(e) => eprintln!("Error: {}", e),
            },
            ConsoleCommand::Sql(sql) => run_query(db, sql),
        }
    }
    Ok(())
}

/// Execute one query and print it, or print the error. Never fails the loop.
pub fn run_query(db: &mut CsvDb, sql: &str) {
    match db.execute(sql) {
        Ok(outcome) => output::print_outcome(&outcome),
        Err(e) => eprintln!("Error: {}", e),
    }
}
