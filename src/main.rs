use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Local, NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use todo_store_lib::commands::{self, CommandCtx, CommandResult};
use todo_store_lib::events::{StatePayload, EVENT_STATE_UPDATED};
use todo_store_lib::logging::init_logging;
use todo_store_lib::models::{BackupSchedule, MonthOverflow};
use todo_store_lib::storage::StorageError;
use todo_store_lib::{AppState, NewTask, Priority, RepeatRule, Settings, TaskPatch, TodoStore};

/// Todo list with recurring tasks, nested categories and a trash
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding data.json, settings.json, backups/ and logs/
    #[arg(long, env = "TODO_STORE_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Act on one projected occurrence of a recurring task (`<taskId>@<YYYY-MM-DD>`)
    #[command(subcommand)]
    Occurrence(OccurrenceCommand),
    /// Manage categories
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Manage tags
    #[command(subcommand)]
    Tag(TagCommand),
    /// Real tasks and projected occurrences over a date window
    Agenda {
        /// First day of the window (defaults to today)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Window length in days, including the first day
        #[arg(long)]
        days: Option<u32>,
    },
    /// Show trashed categories and tasks
    Trash,
    /// Permanently remove everything in the trash
    EmptyTrash,
    /// Write the current data to exports/
    Export,
    /// Replace all data with a previously exported file
    Import { path: PathBuf },
    /// Manage backups of data.json
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Show or change settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// Add a new task
    Add(TaskAddArgs),
    /// Change fields of a task
    Edit {
        id: String,
        #[command(flatten)]
        fields: EditFields,
    },
    /// Flip a task between done and not done
    Done { id: String },
    /// Move a task to the trash
    Trash { id: String },
    /// Bring a task back from the trash
    Restore { id: String },
    /// Delete a task for good
    Purge { id: String },
    /// List visible tasks
    List,
}

#[derive(Subcommand, Debug)]
enum OccurrenceCommand {
    /// Complete (or un-complete) one occurrence
    Toggle { id: String },
    /// Delete one occurrence; later occurrences of the series stop as well
    Delete { id: String },
    /// Turn one occurrence into an independent task with the given changes
    Edit {
        id: String,
        #[command(flatten)]
        fields: EditFields,
    },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Add {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    Rename { id: String, name: String },
    /// Re-parent a category; omit --parent to move it to the top level
    Move {
        id: String,
        #[arg(long)]
        parent: Option<String>,
    },
    Trash { id: String },
    Restore { id: String },
    /// Delete a category, its subcategories and their tasks for good
    Purge { id: String },
    /// Show the category tree with active task counts
    List,
    /// Direct subcategories and tasks of one category
    Contents { id: String },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    Add {
        name: String,
        #[arg(long, default_value = "#808080")]
        color: String,
    },
    /// Delete a tag and strip it from every task
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    List,
    Create,
    Restore { name: String },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        projection_ceiling: Option<u32>,
        #[arg(long, value_enum)]
        month_overflow: Option<OverflowArg>,
        #[arg(long)]
        agenda_days: Option<u32>,
        #[arg(long, value_enum)]
        backup_schedule: Option<ScheduleArg>,
    },
}

#[derive(Args, Debug)]
struct TaskAddArgs {
    title: String,
    /// Due date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Time of day, HH:MM
    #[arg(long, value_parser = parse_time)]
    time: Option<NaiveTime>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long, value_enum, default_value_t = PriorityArg::Medium)]
    priority: PriorityArg,
    #[arg(long)]
    category: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, value_enum, default_value_t = RepeatArg::None)]
    repeat: RepeatArg,
    /// Days between daily repeats
    #[arg(long, default_value_t = 1)]
    interval: u32,
}

#[derive(Args, Debug)]
struct EditFields {
    #[arg(long)]
    title: Option<String>,
    #[arg(short, long)]
    description: Option<String>,
    #[arg(long, conflicts_with = "description")]
    clear_description: bool,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long, value_parser = parse_time)]
    time: Option<NaiveTime>,
    #[arg(long, conflicts_with = "time")]
    clear_time: bool,
    #[arg(long, value_enum)]
    priority: Option<PriorityArg>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, conflicts_with = "category")]
    clear_category: bool,
    /// Replaces the tag list
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, value_enum)]
    repeat: Option<RepeatArg>,
    #[arg(long, default_value_t = 1)]
    interval: u32,
}

impl EditFields {
    fn into_patch(self) -> TaskPatch {
        TaskPatch {
            title: self.title,
            description: if self.clear_description {
                Some(None)
            } else {
                self.description.map(Some)
            },
            completed: None,
            date: self.date,
            time: if self.clear_time {
                Some(None)
            } else {
                self.time.map(Some)
            },
            priority: self.priority.map(Priority::from),
            category_id: if self.clear_category {
                Some(None)
            } else {
                self.category.map(Some)
            },
            tag_ids: (!self.tags.is_empty()).then_some(self.tags),
            repeat: self.repeat.map(|repeat| repeat.into_rule(self.interval)),
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Medium => Priority::Medium,
            PriorityArg::High => Priority::High,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RepeatArg {
    None,
    Daily,
    Monthly,
}

impl RepeatArg {
    fn into_rule(self, interval: u32) -> RepeatRule {
        match self {
            RepeatArg::None => RepeatRule::None,
            RepeatArg::Daily => RepeatRule::Daily { interval },
            RepeatArg::Monthly => RepeatRule::Monthly,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum OverflowArg {
    Rollover,
    Clamp,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ScheduleArg {
    None,
    Daily,
    Weekly,
    Monthly,
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

struct CliCtx {
    data_dir: PathBuf,
}

impl CommandCtx for CliCtx {
    fn data_dir(&self) -> Result<PathBuf, StorageError> {
        Ok(self.data_dir.clone())
    }

    fn emit_state_updated(&self, payload: StatePayload) {
        log::debug!(
            "{EVENT_STATE_UPDATED} todos={} categories={} tags={}",
            payload.todos.len(),
            payload.categories.len(),
            payload.tags.len()
        );
    }
}

fn print_result<T: Serialize>(result: CommandResult<T>) -> ExitCode {
    let failed = !result.ok;
    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(error) => {
            eprintln!("error: could not render result: {error}");
            return ExitCode::FAILURE;
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let Some(data_dir) = cli
        .data_dir
        .or_else(|| dirs::data_dir().map(|dir| dir.join("todo-store")))
    else {
        eprintln!("error: no data directory; pass --data-dir or set TODO_STORE_DIR");
        return ExitCode::FAILURE;
    };
    if let Err(error) = init_logging(&data_dir) {
        eprintln!("warning: file logging disabled: {error}");
    }

    let ctx = CliCtx { data_dir };
    let state = AppState::new(TodoStore::default(), Settings::default());
    let loaded = commands::load_state(&ctx, &state);
    if !loaded.ok {
        return print_result(loaded);
    }
    run(cli.command, &ctx, &state)
}

fn run(command: Commands, ctx: &CliCtx, state: &AppState) -> ExitCode {
    let today = Local::now().date_naive();
    match command {
        Commands::Task(command) => match command {
            TaskCommand::Add(args) => {
                let mut fields = NewTask::new(args.title, args.date.unwrap_or(today));
                fields.description = args.description;
                fields.time = args.time;
                fields.priority = args.priority.into();
                fields.category_id = args.category;
                fields.tag_ids = args.tags;
                fields.repeat = args.repeat.into_rule(args.interval);
                print_result(commands::add_task(ctx, state, fields))
            }
            TaskCommand::Edit { id, fields } => {
                print_result(commands::update_task(ctx, state, &id, fields.into_patch()))
            }
            TaskCommand::Done { id } => print_result(commands::toggle_task(ctx, state, &id)),
            TaskCommand::Trash { id } => {
                print_result(commands::move_task_to_trash(ctx, state, &id))
            }
            TaskCommand::Restore { id } => print_result(commands::restore_task(ctx, state, &id)),
            TaskCommand::Purge { id } => {
                print_result(commands::permanently_delete_task(ctx, state, &id))
            }
            TaskCommand::List => print_result(commands::visible_tasks(state)),
        },
        Commands::Occurrence(command) => match command {
            OccurrenceCommand::Toggle { id } => {
                print_result(commands::toggle_virtual_occurrence(ctx, state, &id))
            }
            OccurrenceCommand::Delete { id } => {
                print_result(commands::delete_virtual_occurrence(ctx, state, &id))
            }
            OccurrenceCommand::Edit { id, fields } => print_result(
                commands::materialize_virtual_occurrence(ctx, state, &id, fields.into_patch()),
            ),
        },
        Commands::Category(command) => match command {
            CategoryCommand::Add { name, parent } => {
                print_result(commands::add_category(ctx, state, &name, parent.as_deref()))
            }
            CategoryCommand::Rename { id, name } => {
                print_result(commands::rename_category(ctx, state, &id, &name))
            }
            CategoryCommand::Move { id, parent } => {
                print_result(commands::move_category(ctx, state, &id, parent.as_deref()))
            }
            CategoryCommand::Trash { id } => {
                print_result(commands::move_category_to_trash(ctx, state, &id))
            }
            CategoryCommand::Restore { id } => {
                print_result(commands::restore_category(ctx, state, &id))
            }
            CategoryCommand::Purge { id } => {
                print_result(commands::permanently_delete_category(ctx, state, &id))
            }
            CategoryCommand::List => print_result(commands::category_tree(state)),
            CategoryCommand::Contents { id } => {
                print_result(commands::category_contents(state, &id))
            }
        },
        Commands::Tag(command) => match command {
            TagCommand::Add { name, color } => {
                print_result(commands::add_tag(ctx, state, &name, &color))
            }
            TagCommand::Remove { id } => print_result(commands::remove_tag(ctx, state, &id)),
        },
        Commands::Agenda { from, days } => {
            print_result(commands::agenda(state, from.unwrap_or(today), days))
        }
        Commands::Trash => print_result(commands::trash(state)),
        Commands::EmptyTrash => print_result(commands::empty_trash(ctx, state)),
        Commands::Export => print_result(commands::export_json(ctx, state)),
        Commands::Import { path } => print_result(commands::import_json(ctx, state, &path)),
        Commands::Backup(command) => match command {
            BackupCommand::List => print_result(commands::list_backups(ctx)),
            BackupCommand::Create => print_result(commands::create_backup(ctx, state)),
            BackupCommand::Restore { name } => {
                print_result(commands::restore_backup(ctx, state, &name))
            }
        },
        Commands::Settings(command) => match command {
            SettingsCommand::Show => print_result(commands::get_settings(state)),
            SettingsCommand::Set {
                projection_ceiling,
                month_overflow,
                agenda_days,
                backup_schedule,
            } => {
                let mut settings = state.settings();
                if let Some(ceiling) = projection_ceiling {
                    settings.projection_ceiling = ceiling;
                }
                if let Some(overflow) = month_overflow {
                    settings.month_overflow = match overflow {
                        OverflowArg::Rollover => MonthOverflow::Rollover,
                        OverflowArg::Clamp => MonthOverflow::Clamp,
                    };
                }
                if let Some(days) = agenda_days {
                    settings.agenda_days = days;
                }
                if let Some(schedule) = backup_schedule {
                    settings.backup_schedule = match schedule {
                        ScheduleArg::None => BackupSchedule::None,
                        ScheduleArg::Daily => BackupSchedule::Daily,
                        ScheduleArg::Weekly => BackupSchedule::Weekly,
                        ScheduleArg::Monthly => BackupSchedule::Monthly,
                    };
                }
                print_result(commands::update_settings(ctx, state, settings))
            }
        },
    }
}
