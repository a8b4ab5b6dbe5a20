use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;

use sqlrunner::common::{sql_text, ConnectionRef, RunMode};
use sqlrunner::connection::{Connection, ConnectionProfile, SqliteConnection};
use sqlrunner::engine::hooks::{ExecutionController, ParameterPrompter};
use sqlrunner::engine::{EngineConfig, ExecutionEngine, ExecutionResult, VariablePool};

const HISTORY_FILE: &str = ".sqlrun_history";
const PROMPT: &str = "sqlrun> ";
const CONTINUATION_PROMPT: &str = "   ...> ";

#[derive(Parser)]
#[command(author, version, about = "sqlrun - run SQL statements and scripts against SQLite")]
struct Cli {
    /// SQLite database file; in-memory if omitted
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Connection profile name
    #[arg(long, default_value = "default")]
    profile: String,

    /// User name reported in statement logs
    #[arg(short, long, default_value = "sqlrun")]
    user: String,

    /// Skip statements that modify the database
    #[arg(long)]
    read_only: bool,

    /// Ask before running updating statements
    #[arg(long)]
    confirm_updates: bool,

    /// Start with autocommit disabled
    #[arg(long)]
    no_autocommit: bool,

    /// Maximum number of rows to retrieve (0 for unlimited)
    #[arg(short, long)]
    max_rows: Option<usize>,

    /// JSON engine configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive shell
    Shell,

    /// Execute a single statement
    Query {
        /// Statement to execute
        query: String,
    },

    /// Execute a script file
    Script {
        /// Path of the script
        file: PathBuf,

        /// Keep going after a failed statement
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Show connection capabilities and the known verbs
    Info,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init();
}

fn read_answer(question: &str) -> Option<String> {
    print!("{}", question);
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// Reads values for `$[?name]` variables from stdin
struct ConsolePrompter;

impl ParameterPrompter for ConsolePrompter {
    fn process_prompts(&mut self, sql: &str, variables: &VariablePool) -> bool {
        for name in VariablePool::prompt_names(sql) {
            let current = variables.get(&name).unwrap_or_default();
            match read_answer(&format!("Value for {} [{}]: ", name, current)) {
                Some(answer) if answer.is_empty() => variables.set(name, current),
                Some(answer) => variables.set(name, answer),
                None => return false,
            }
        }
        true
    }
}

/// Asks on stdin before updating statements run
struct ConsoleController;

impl ExecutionController for ConsoleController {
    fn confirm_execution(&mut self, sql: &str, verb: &str) -> bool {
        println!("{}", sql_text::strip_delimiter(sql));
        matches!(
            read_answer(&format!("Execute {}? [y/N] ", verb)).as_deref().map(str::to_lowercase).as_deref(),
            Some("y") | Some("yes")
        )
    }
}

fn load_config(cli: &Cli, run_mode: RunMode) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(max_rows) = cli.max_rows {
        config.max_rows = max_rows;
    }
    if cli.verbose {
        config.verbose_logging = true;
    }
    config.run_mode = run_mode;
    Ok(config)
}

fn open_connection(cli: &Cli) -> Result<ConnectionRef> {
    let url = match &cli.db {
        Some(path) => format!("sqlite:{}", path.display()),
        None => "sqlite::memory:".to_string(),
    };
    let mut profile = ConnectionProfile::new(cli.profile.clone(), url, cli.user.clone());
    profile.read_only = cli.read_only;
    profile.confirm_updates = cli.confirm_updates;

    let conn = match &cli.db {
        Some(path) => SqliteConnection::open(path, profile),
        None => SqliteConnection::open_in_memory(profile),
    }
    .context("Failed to open database")?;
    if cli.no_autocommit {
        conn.set_auto_commit(false)?;
    }
    Ok(Arc::new(conn))
}

fn create_engine(cli: &Cli, run_mode: RunMode) -> Result<ExecutionEngine> {
    let config = load_config(cli, run_mode)?;
    let mut engine = ExecutionEngine::new(config);
    engine.set_parameter_prompter(Box::new(ConsolePrompter));
    engine.set_execution_controller(Box::new(ConsoleController));
    engine.bind_connection(Some(open_connection(cli)?));
    Ok(engine)
}

fn execute_statement(engine: &mut ExecutionEngine, sql: &str) -> bool {
    let outcome = engine.run(sql);
    engine.statement_done();
    match outcome {
        Ok(result) => {
            display_result(&result);
            result.is_success()
        }
        Err(err) => {
            println!("Error: {}", err);
            false
        }
    }
}

fn run_shell(engine: &mut ExecutionEngine) -> Result<()> {
    println!("Welcome to sqlrun. Type 'help' for assistance or 'exit' to quit.");

    let mut rl = Editor::<(), DefaultHistory>::new()?;
    if let Err(err) = rl.load_history(HISTORY_FILE) {
        if !err.to_string().contains("No such file or directory") {
            println!("Error loading history: {}", err);
        }
    }

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { PROMPT } else { CONTINUATION_PROMPT };
        match rl.readline(prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if buffer.is_empty() {
                    match trimmed.to_lowercase().as_str() {
                        "" => continue,
                        "exit" | "quit" => {
                            println!("Goodbye!");
                            break;
                        }
                        "help" => {
                            print_help();
                            continue;
                        }
                        _ => {}
                    }
                }

                buffer.push_str(&line);
                buffer.push('\n');
                if !trimmed.ends_with(';') {
                    continue;
                }

                let script = std::mem::take(&mut buffer);
                let _ = rl.add_history_entry(script.trim());
                let mut stop = false;
                for statement in sql_text::split_statements(&script) {
                    let outcome = engine.run(&statement);
                    engine.statement_done();
                    match outcome {
                        Ok(result) => {
                            display_result(&result);
                            stop |= result.stop_script();
                        }
                        Err(err) => println!("Error: {}", err),
                    }
                }
                if stop {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                if buffer.is_empty() {
                    println!("CTRL-C");
                    break;
                }
                buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {}", err);
                break;
            }
        }
    }

    engine.done();
    if let Err(err) = rl.save_history(HISTORY_FILE) {
        println!("Error saving history: {}", err);
    }
    Ok(())
}

fn run_script(engine: &mut ExecutionEngine, file: &Path, continue_on_error: bool) -> Result<bool> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {}", file.display()))?;
    let results = engine.run_script(&script, continue_on_error)?;
    let mut all_ok = true;
    for result in &results {
        display_result(result);
        all_ok &= result.is_success();
    }
    Ok(all_ok)
}

fn print_info(engine: &ExecutionEngine) {
    println!("sqlrun Information:");
    if let Some(conn) = engine.connection() {
        let dbms = conn.dbms();
        println!("  Connection: {} ({})", conn.id(), conn.profile().url);
        println!("  DBMS: {} [{}]", dbms.product_name, dbms.dbms_id);
        println!("  Autocommit: {}", conn.auto_commit());
        println!("  Savepoints: {}", dbms.supports_savepoints);
        println!("  Catalogs: {}", dbms.supports_catalogs);
        println!("  Session variables: {}", dbms.supports_session_variables);
    }
    println!("  Verbs: {}", engine.registry().verbs().join(", "));
}

fn print_help() {
    println!("Enter SQL statements terminated by ';'. Statements may span lines.");
    println!();
    println!("Client commands:");
    println!("  WbStartBatch / WbEndBatch     - Collect statements and run them as one batch");
    println!("  WbExport -file=<path>         - Write the next result to a delimited file");
    println!("           [-delimiter=<c>] [-header=true|false]");
    println!("  WbVarDef <name>=<value>       - Define a variable, used as $[name]");
    println!("  WbVarDelete <name>|*          - Remove variables");
    println!("  WbVarList                     - List variables");
    println!("  WbEcho <text>                 - Print text");
    println!("  WbMode readonly|normal|confirm|reset");
    println!("  DESC <table>                  - Show the columns of a table");
    println!("  WbExit                        - Leave the shell");
    println!();
    println!("Other commands:");
    println!("  help                          - Display this help message");
    println!("  exit                          - Exit the shell");
}

fn display_result(result: &ExecutionResult) {
    print!("{}", format_result(result));
}

fn format_result(result: &ExecutionResult) -> String {
    let mut out = String::new();
    for result_set in result.result_sets() {
        out.push_str(&result_set.to_string_table());
        out.push('\n');
    }
    for message in result.messages() {
        out.push_str(message);
        out.push('\n');
    }
    if let Some(duration) = result.duration() {
        out.push_str(&format!("Execution time: {} ms\n", duration.as_millis()));
    }
    out
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let run_mode = match cli.command {
        None | Some(Commands::Shell) => RunMode::Console,
        Some(_) => RunMode::Batch,
    };
    let mut engine = create_engine(&cli, run_mode)?;

    let ok = match &cli.command {
        None | Some(Commands::Shell) => {
            run_shell(&mut engine)?;
            true
        }
        Some(Commands::Query { query }) => {
            let ok = execute_statement(&mut engine, query);
            engine.done();
            ok
        }
        Some(Commands::Script { file, continue_on_error }) => run_script(&mut engine, file, *continue_on_error)?,
        Some(Commands::Info) => {
            print_info(&engine);
            true
        }
    };

    if let Some(conn) = engine.connection() {
        if !conn.auto_commit() {
            conn.commit().context("Failed to commit on exit")?;
        }
        conn.disconnect()?;
    }
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
