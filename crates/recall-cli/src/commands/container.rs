//! Container management commands.

use clap::Subcommand;
use recall_core::{Container, ContainerHierarchy};
use uuid::Uuid;

use super::{print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum ContainerAction {
    /// Create a container
    Add {
        /// Display name
        name: String,
        /// Parent container ID (makes this a child in the parent's scope)
        #[arg(long)]
        parent: Option<String>,
        /// Explicit ID (default: generated)
        #[arg(long)]
        id: Option<String>,
    },
    /// List all containers
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(ctx: &Context, action: ContainerAction) -> CliResult {
    let db = ctx.open_database()?;
    match action {
        ContainerAction::Add { name, parent, id } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut container = Container::new(id, name);
            container.parent_id = parent;
            db.insert_container(&container)?;
            println!("Container created: {}", container.id);
        }
        ContainerAction::List { json } => {
            let containers = db.containers()?;
            if json {
                return print_json(&containers);
            }
            if containers.is_empty() {
                println!("No containers.");
            }
            for c in &containers {
                match &c.parent_id {
                    Some(parent) => println!("{}  {}  (in {parent})", c.id, c.name),
                    None => println!("{}  {}", c.id, c.name),
                }
            }
        }
    }
    Ok(())
}
