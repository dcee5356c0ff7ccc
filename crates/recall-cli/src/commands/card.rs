//! Card management and review commands.
//!
//! `answer` writes the answer first and then synchronizes the card's scope,
//! the same order a host application follows.

use chrono::{DateTime, Utc};
use clap::Subcommand;
use recall_core::{
    timer_end_time, Card, CardQuery, CardStore, ContainerHierarchy, ReviewService,
};
use serde::Serialize;

use super::{parse_rfc3339, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum CardAction {
    /// Create a card in a container
    Add {
        /// Container ID
        container: String,
    },
    /// Show one card
    Show {
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List cards under a scope (the container and its direct children)
    List {
        scope: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record an answer, then synchronize the card's scope
    Answer {
        id: String,
        #[arg(long, conflicts_with = "wrong", required_unless_present = "wrong")]
        correct: bool,
        #[arg(long)]
        wrong: bool,
        /// Explicit next review time (RFC 3339), overriding the interval table
        #[arg(long, value_parser = parse_rfc3339)]
        next: Option<DateTime<Utc>>,
    },
    /// Hold a card for a number of hours
    Freeze { id: String, hours: u32 },
    /// Lift a hold
    Unfreeze { id: String },
    /// Flag a card overdue with a deadline this many hours out
    Overdue { id: String, hours: u32 },
    /// Reset a card to a fresh state
    Reset { id: String },
}

/// A card with its state derived at display time.
#[derive(Serialize)]
struct CardView<'a> {
    #[serde(flatten)]
    card: &'a Card,
    state: &'static str,
    timer_end: Option<DateTime<Utc>>,
}

impl<'a> CardView<'a> {
    fn new(card: &'a Card, now: DateTime<Utc>) -> Self {
        let (state, timer_end) = if card.is_mastered {
            ("mastered", None)
        } else {
            let state = card.state(now);
            (state.as_str(), timer_end_time(card, state))
        };
        Self {
            card,
            state,
            timer_end,
        }
    }

    fn print(&self) {
        let c = self.card;
        println!("Card: {}", c.id);
        println!("  container:  {}", c.container_id);
        println!("  state:      {}", self.state);
        println!("  stage:      {}", c.stage);
        println!("  mastered:   {} (cycles: {})", c.is_mastered, c.master_cycles);
        println!("  answers:    {} correct / {} wrong", c.correct_total, c.wrong_total);
        println!("  next:       {}", fmt_ts(c.next_review_at));
        if let Some(end) = self.timer_end {
            println!("  timer ends: {}", end.to_rfc3339());
        }
    }

    fn print_row(&self) {
        println!(
            "{}  {:<8} stage {}  {:<15}  {}",
            self.card.id,
            self.card.container_id,
            self.card.stage,
            self.state,
            fmt_ts(self.timer_end)
        );
    }
}

fn fmt_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
}

pub fn run(ctx: &Context, action: CardAction) -> CliResult {
    let db = ctx.open_database()?;
    let now = Utc::now();
    let service = || -> CliResult<ReviewService> { ctx.review_service(&db) };

    let updated = match action {
        CardAction::Add { container } => {
            let card = Card::new(container, now);
            db.insert_card(&card)?;
            println!("Card created: {}", card.id);
            return Ok(());
        }
        CardAction::Show { id, json } => {
            let card = db.get_card(&id)?;
            let view = CardView::new(&card, now);
            if json {
                return print_json(&view);
            }
            view.print();
            return Ok(());
        }
        CardAction::List { scope, json } => {
            let containers = db.containers_in_scope(&scope)?;
            let query = CardQuery {
                containers,
                include_mastered: true,
            };
            let cards = db.query_cards(&query)?;
            let views: Vec<CardView> = cards.iter().map(|c| CardView::new(c, now)).collect();
            if json {
                return print_json(&views);
            }
            if views.is_empty() {
                println!("No cards.");
            }
            for view in &views {
                view.print_row();
            }
            return Ok(());
        }
        CardAction::Answer {
            id, correct, next, ..
        } => {
            let card = service()?.record_answer(&id, correct, now, next)?;
            let result = ctx
                .sync_trigger(&db)
                .on_answer_recorded(&card.id, &card.container_id, now)?;
            println!(
                "Answer recorded ({}): stage {}",
                if correct { "correct" } else { "wrong" },
                card.stage
            );
            if result.cards_merged > 0 {
                println!(
                    "Synchronized {} card(s) in scope {}",
                    result.cards_merged, result.scope_id
                );
            }
            db.get_card(&card.id)?
        }
        CardAction::Freeze { id, hours } => service()?.freeze(&id, hours, now)?,
        CardAction::Unfreeze { id } => service()?.unfreeze(&id)?,
        CardAction::Overdue { id, hours } => service()?.mark_overdue(&id, hours, now)?,
        CardAction::Reset { id } => service()?.reset(&id)?,
    };

    CardView::new(&updated, now).print();
    Ok(())
}
