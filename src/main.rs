use clap::{Parser, Subcommand};

use todoit::config::Config;
use todoit::error::Result;
use todoit::manager::TodoManager;
use todoit::model::{CompletionStateValue, CompletionStates, DependencyType, ItemStatus, ListStatus};
use todoit::output::{self, OutputFormat};

const DEFAULT_DB_PATH: &str = "todoit.db";

#[derive(Parser)]
#[command(name = "todoit", version, about = "Persistent, programmatic TODO/task-management engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List-level operations
    List {
        #[command(subcommand)]
        action: ListAction,
    },
    /// Item-level operations
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Cross-item dependency operations
    Dep {
        #[command(subcommand)]
        action: DepAction,
    },
    /// Tag operations
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// Key/value property operations
    Property {
        #[command(subcommand)]
        action: PropertyAction,
    },
    /// Read-only aggregate statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
    /// Bulk import/export of a whole list
    Io {
        #[command(subcommand)]
        action: IoAction,
    },
    /// Advisory reports
    Reports {
        #[command(subcommand)]
        action: ReportsAction,
    },
    /// Append-only audit trail
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Print the persisted schema (table definitions), for operators
    Schema,
}

#[derive(Subcommand)]
enum ListAction {
    /// Create a new list
    Create {
        list_key: String,
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Fetch one list by key
    Get { list_key: String },
    /// All visible lists
    All {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Update a list's title/description/status
    Update {
        list_key: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<ListStatus>,
    },
    /// Delete a list and everything it owns
    Delete { list_key: String },
    /// Mark a list archived
    Archive { list_key: String },
    /// Mark an archived list active again
    Unarchive { list_key: String },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Add an item (optionally as a subitem of --parent)
    Add {
        list_key: String,
        item_key: String,
        content: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Fetch one item by key
    Get {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// All items in a list, optionally filtered by status
    List {
        list_key: String,
        #[arg(long)]
        status: Option<ItemStatus>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Change a leaf item's status
    Status {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
        new_status: ItemStatus,
        /// Completion-state entries as `key=value` (`true`/`false` parse as bool, anything else as text)
        #[arg(long = "state")]
        states: Vec<String>,
    },
    /// Move an item to a new parent (or to root with no --new-parent)
    Move {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long = "new-parent")]
        new_parent: Option<String>,
    },
    /// Delete a leaf item
    Delete {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// The engine's pick for what to work on next
    Next {
        list_key: String,
        /// Use the simple first-unblocked-pending rule instead of smart selection
        #[arg(long)]
        simple: bool,
    },
    /// Edit an item's content
    Edit {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Direct children of one item
    Subtasks {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Path to the item plus its direct children
    Tree {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Items carrying a matching property value
    Find {
        list_key: String,
        property_key: String,
        property_value: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Parents whose children jointly satisfy `key=status` conditions
    FindStatus {
        list_key: String,
        /// One or more `item_key=status` conditions
        conditions: Vec<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Per-item completion-state map
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand)]
enum StateAction {
    /// Show the completion-state map
    List {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Remove one key from the completion-state map
    Remove {
        list_key: String,
        item_key: String,
        key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Clear the whole completion-state map
    Clear {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum DepAction {
    /// Record that one item requires/blocks/relates-to another
    Add {
        dependent_list: String,
        dependent_item: String,
        required_list: String,
        required_item: String,
        #[arg(long, default_value = "requires")]
        kind: DependencyType,
        #[arg(long = "dependent-parent")]
        dependent_parent: Option<String>,
        #[arg(long = "required-parent")]
        required_parent: Option<String>,
    },
    /// Remove a dependency edge
    Remove {
        dependent_list: String,
        dependent_item: String,
        required_list: String,
        required_item: String,
        #[arg(long = "dependent-parent")]
        dependent_parent: Option<String>,
        #[arg(long = "required-parent")]
        required_parent: Option<String>,
    },
    /// Whether an item can start now
    CanStart {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Whether an item can be marked complete now
    CanComplete {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum TagAction {
    /// Attach a tag to a list (creating it if new)
    Add { list_key: String, tag_name: String },
    /// Detach a tag from a list
    Remove { list_key: String, tag_name: String },
    /// Tags on one list
    List { list_key: String },
    /// Every tag in the palette
    All,
}

#[derive(Subcommand)]
enum PropertyAction {
    /// Set an item property
    ItemSet {
        list_key: String,
        item_key: String,
        key: String,
        value: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Get an item property
    ItemGet {
        list_key: String,
        item_key: String,
        key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// All properties on an item
    ItemList {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Delete an item property
    ItemDelete {
        list_key: String,
        item_key: String,
        key: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Set a list property
    ListSet { list_key: String, key: String, value: String },
    /// Get a list property
    ListGet { list_key: String, key: String },
    /// All properties on a list
    ListList { list_key: String },
    /// Delete a list property
    ListDelete { list_key: String, key: String },
}

#[derive(Subcommand)]
enum StatsAction {
    /// Whole-list status counts
    Progress { list_key: String },
    /// Whole-subtree status counts under one item
    Hierarchy {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum IoAction {
    /// Dump a list (and its items/properties/tags) to stdout
    Export { list_key: String },
    /// Recreate a list from a prior export, read from stdin
    Import,
}

#[derive(Subcommand)]
enum ReportsAction {
    /// Why an item can't start yet, if it can't
    Errors {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Audit trail for one item
    Item {
        list_key: String,
        item_key: String,
        #[arg(long)]
        parent: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Audit trail for a whole list
    List {
        list_key: String,
        #[arg(long)]
        limit: Option<i64>,
    },
}

fn run(command: Commands, format: OutputFormat) -> Result<()> {
    let config = Config::from_env(DEFAULT_DB_PATH);
    let manager = TodoManager::new(&config)?;

    match command {
        Commands::List { action } => run_list(&manager, action, format),
        Commands::Item { action } => run_item(&manager, action, format),
        Commands::Dep { action } => run_dep(&manager, action, format),
        Commands::Tag { action } => run_tag(&manager, action, format),
        Commands::Property { action } => run_property(&manager, action, format),
        Commands::Stats { action } => run_stats(&manager, action, format),
        Commands::Io { action } => run_io(&manager, action, format),
        Commands::Reports { action } => run_reports(&manager, action, format),
        Commands::History { action } => run_history(&manager, action, format),
        Commands::Schema => {
            println!("{}", todoit::store::SCHEMA_SQL);
            Ok(())
        }
    }
}

fn run_list(manager: &TodoManager, action: ListAction, format: OutputFormat) -> Result<()> {
    match action {
        ListAction::Create { list_key, title, description } => {
            let list = manager.create_list(&list_key, &title, description.as_deref(), &Default::default())?;
            println!("{}", output::format_one(format, &list)?);
        }
        ListAction::Get { list_key } => {
            let list = manager.get_list(&list_key)?;
            println!("{}", output::format_one(format, &list)?);
        }
        ListAction::All { limit } => {
            let lists = manager.list_lists(limit)?;
            println!("{}", output::format_lists(format, &lists)?);
        }
        ListAction::Update { list_key, title, description, status } => {
            let list = manager.update_list(
                &list_key,
                title.as_deref(),
                description.as_deref().map(Some),
                status,
                None,
            )?;
            println!("{}", output::format_one(format, &list)?);
        }
        ListAction::Delete { list_key } => {
            manager.delete_list(&list_key)?;
            println!("deleted {list_key}");
        }
        ListAction::Archive { list_key } => {
            let list = manager.archive_list(&list_key)?;
            println!("{}", output::format_one(format, &list)?);
        }
        ListAction::Unarchive { list_key } => {
            let list = manager.unarchive_list(&list_key)?;
            println!("{}", output::format_one(format, &list)?);
        }
    }
    Ok(())
}

fn run_item(manager: &TodoManager, action: ItemAction, format: OutputFormat) -> Result<()> {
    match action {
        ItemAction::Add { list_key, item_key, content, parent } => {
            let item = manager.add_item(&list_key, &item_key, &content, parent.as_deref(), &Default::default())?;
            println!("{}", output::format_one(format, &item)?);
        }
        ItemAction::Get { list_key, item_key, parent } => {
            let item = manager.get_item(&list_key, &item_key, parent.as_deref())?;
            println!("{}", output::format_one(format, &item)?);
        }
        ItemAction::List { list_key, status, limit } => {
            let items = manager.list_items(&list_key, status, limit)?;
            println!("{}", output::format_items(format, &items)?);
        }
        ItemAction::Status { list_key, item_key, parent, new_status, states } => {
            let parsed = parse_completion_states(&states)?;
            let completion_states = if parsed.is_empty() { None } else { Some(&parsed) };
            let item = manager.set_item_status(&list_key, &item_key, parent.as_deref(), new_status, completion_states)?;
            println!("{}", output::format_one(format, &item)?);
        }
        ItemAction::Move { list_key, item_key, parent, new_parent } => {
            let item = manager.move_item(&list_key, &item_key, parent.as_deref(), new_parent.as_deref())?;
            println!("{}", output::format_one(format, &item)?);
        }
        ItemAction::Delete { list_key, item_key, parent } => {
            manager.delete_item(&list_key, &item_key, parent.as_deref())?;
            println!("deleted {item_key}");
        }
        ItemAction::Next { list_key, simple } => match manager.next_pending_item(&list_key, !simple)? {
            Some(item) => println!("{}", output::format_one(format, &item)?),
            None => println!("(nothing actionable)"),
        },
        ItemAction::Edit { list_key, item_key, parent, content } => {
            let item = manager.edit_item(&list_key, &item_key, parent.as_deref(), content.as_deref(), None)?;
            println!("{}", output::format_one(format, &item)?);
        }
        ItemAction::Subtasks { list_key, item_key, parent } => {
            let items = manager.item_children(&list_key, &item_key, parent.as_deref())?;
            println!("{}", output::format_items(format, &items)?);
        }
        ItemAction::Tree { list_key, item_key, parent } => {
            let (path, children) = manager.item_tree(&list_key, &item_key, parent.as_deref())?;
            println!(
                "{}",
                output::format_one(format, &serde_json::json!({"path": path, "children": children}))?
            );
        }
        ItemAction::Find { list_key, property_key, property_value, limit } => {
            let items = manager.find_items_by_property(&list_key, &property_key, &property_value, limit)?;
            println!("{}", output::format_items(format, &items)?);
        }
        ItemAction::FindStatus { list_key, conditions, limit } => {
            let mut parsed = std::collections::HashMap::new();
            for condition in &conditions {
                let (key, status) = condition.split_once('=').ok_or_else(|| {
                    todoit::error::TodoError::InvalidArgument(format!(
                        "expected 'item_key=status', got '{condition}'"
                    ))
                })?;
                parsed.insert(key.to_string(), status.parse::<ItemStatus>()?);
            }
            let groups = manager.find_subitems_by_status(&list_key, &parsed, limit)?;
            let rendered: Vec<_> = groups
                .into_iter()
                .map(|(parent, matching)| serde_json::json!({"parent": parent, "matching_subitems": matching}))
                .collect();
            println!("{}", output::format_one(format, &rendered)?);
        }
        ItemAction::State { action } => run_state(manager, action, format)?,
    }
    Ok(())
}

fn parse_completion_states(entries: &[String]) -> Result<CompletionStates> {
    let mut states = CompletionStates::new();
    for entry in entries {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            todoit::error::TodoError::InvalidArgument(format!("expected 'key=value', got '{entry}'"))
        })?;
        let parsed = match value {
            "true" => CompletionStateValue::Bool(true),
            "false" => CompletionStateValue::Bool(false),
            other => CompletionStateValue::Text(other.to_string()),
        };
        states.insert(key.to_string(), parsed);
    }
    Ok(states)
}

fn run_state(manager: &TodoManager, action: StateAction, format: OutputFormat) -> Result<()> {
    match action {
        StateAction::List { list_key, item_key, parent } => {
            let states = manager.list_completion_states(&list_key, &item_key, parent.as_deref())?;
            println!("{}", output::format_one(format, &states)?);
        }
        StateAction::Remove { list_key, item_key, key, parent } => {
            manager.remove_completion_state(&list_key, &item_key, parent.as_deref(), &key)?;
            println!("removed {key}");
        }
        StateAction::Clear { list_key, item_key, parent } => {
            manager.clear_completion_states(&list_key, &item_key, parent.as_deref())?;
            println!("cleared");
        }
    }
    Ok(())
}

fn run_dep(manager: &TodoManager, action: DepAction, format: OutputFormat) -> Result<()> {
    match action {
        DepAction::Add {
            dependent_list,
            dependent_item,
            required_list,
            required_item,
            kind,
            dependent_parent,
            required_parent,
        } => {
            let dep = manager.add_dependency(
                &dependent_list,
                &dependent_item,
                dependent_parent.as_deref(),
                &required_list,
                &required_item,
                required_parent.as_deref(),
                kind,
                &Default::default(),
            )?;
            println!("{}", output::format_one(format, &dep)?);
        }
        DepAction::Remove {
            dependent_list,
            dependent_item,
            required_list,
            required_item,
            dependent_parent,
            required_parent,
        } => {
            manager.remove_dependency(
                &dependent_list,
                &dependent_item,
                dependent_parent.as_deref(),
                &required_list,
                &required_item,
                required_parent.as_deref(),
            )?;
            println!("removed");
        }
        DepAction::CanStart { list_key, item_key, parent } => {
            println!("{}", manager.can_start_item(&list_key, &item_key, parent.as_deref())?);
        }
        DepAction::CanComplete { list_key, item_key, parent } => {
            println!("{}", manager.can_complete_item(&list_key, &item_key, parent.as_deref())?);
        }
    }
    Ok(())
}

fn run_tag(manager: &TodoManager, action: TagAction, format: OutputFormat) -> Result<()> {
    match action {
        TagAction::Add { list_key, tag_name } => {
            let tag = manager.add_tag(&list_key, &tag_name)?;
            println!("{}", output::format_one(format, &tag)?);
        }
        TagAction::Remove { list_key, tag_name } => {
            manager.remove_tag(&list_key, &tag_name)?;
            println!("removed");
        }
        TagAction::List { list_key } => {
            let tags = manager.list_tags_for(&list_key)?;
            println!("{}", output::format_one(format, &tags)?);
        }
        TagAction::All => {
            let tags = manager.all_tags()?;
            println!("{}", output::format_one(format, &tags)?);
        }
    }
    Ok(())
}

fn run_property(manager: &TodoManager, action: PropertyAction, format: OutputFormat) -> Result<()> {
    match action {
        PropertyAction::ItemSet { list_key, item_key, key, value, parent } => {
            let prop = manager.set_item_property(&list_key, &item_key, parent.as_deref(), &key, &value)?;
            println!("{}", output::format_one(format, &prop)?);
        }
        PropertyAction::ItemGet { list_key, item_key, key, parent } => {
            let prop = manager.get_item_property(&list_key, &item_key, parent.as_deref(), &key)?;
            println!("{}", output::format_one(format, &prop)?);
        }
        PropertyAction::ItemList { list_key, item_key, parent } => {
            let props = manager.list_item_properties(&list_key, &item_key, parent.as_deref())?;
            println!("{}", output::format_one(format, &props)?);
        }
        PropertyAction::ItemDelete { list_key, item_key, key, parent } => {
            manager.delete_item_property(&list_key, &item_key, parent.as_deref(), &key)?;
            println!("deleted {key}");
        }
        PropertyAction::ListSet { list_key, key, value } => {
            let prop = manager.set_list_property(&list_key, &key, &value)?;
            println!("{}", output::format_one(format, &prop)?);
        }
        PropertyAction::ListGet { list_key, key } => {
            let prop = manager.get_list_property(&list_key, &key)?;
            println!("{}", output::format_one(format, &prop)?);
        }
        PropertyAction::ListList { list_key } => {
            let props = manager.list_list_properties(&list_key)?;
            println!("{}", output::format_one(format, &props)?);
        }
        PropertyAction::ListDelete { list_key, key } => {
            manager.delete_list_property(&list_key, &key)?;
            println!("deleted {key}");
        }
    }
    Ok(())
}

fn run_stats(manager: &TodoManager, action: StatsAction, format: OutputFormat) -> Result<()> {
    match action {
        StatsAction::Progress { list_key } => {
            let stats = manager.list_progress(&list_key)?;
            println!("{}", output::format_one(format, &stats)?);
        }
        StatsAction::Hierarchy { list_key, item_key, parent } => {
            let stats = manager.item_hierarchy_stats(&list_key, &item_key, parent.as_deref())?;
            println!(
                "{}",
                output::format_one(
                    format,
                    &serde_json::json!({
                        "total_subitems": stats.total_subitems,
                        "pending_subitems": stats.pending_subitems,
                        "in_progress_subitems": stats.in_progress_subitems,
                        "completed_subitems": stats.completed_subitems,
                        "failed_subitems": stats.failed_subitems,
                    })
                )?
            );
        }
    }
    Ok(())
}

fn run_io(manager: &TodoManager, action: IoAction, format: OutputFormat) -> Result<()> {
    match action {
        IoAction::Export { list_key } => {
            let export = manager.export_list(&list_key)?;
            println!("{}", output::format_one(format, &export)?);
        }
        IoAction::Import => {
            let stdin = std::io::read_to_string(std::io::stdin())?;
            let export: todoit::manager::ListExport = serde_json::from_str(&stdin)?;
            let list = manager.import_list(&export)?;
            println!("{}", output::format_one(format, &list)?);
        }
    }
    Ok(())
}

fn run_reports(manager: &TodoManager, action: ReportsAction, format: OutputFormat) -> Result<()> {
    match action {
        ReportsAction::Errors { list_key, item_key, parent } => {
            let reason = manager.blocking_reason(&list_key, &item_key, parent.as_deref())?;
            println!("{}", output::format_one(format, &reason)?);
        }
    }
    Ok(())
}

fn run_history(manager: &TodoManager, action: HistoryAction, format: OutputFormat) -> Result<()> {
    match action {
        HistoryAction::Item { list_key, item_key, parent, limit } => {
            let entries = manager.item_history(&list_key, &item_key, parent.as_deref(), limit)?;
            println!("{}", output::format_one(format, &entries)?);
        }
        HistoryAction::List { list_key, limit } => {
            let entries = manager.list_history(&list_key, limit)?;
            println!("{}", output::format_one(format, &entries)?);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from_env();
    if let Err(e) = run(cli.command, format) {
        match format {
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({"error": e.code(), "message": e.to_string()})
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
