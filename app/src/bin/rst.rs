use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use structopt::StructOpt;

use infra::ids::Id;
use rustaurant::approvals::{
    parse_flexible_date, ApprovalRequest, Decision, ListApprovals, Review, ReviewStatus,
};
use rustaurant::inventory::{ReceiveStock, StockLevel};
use rustaurant::production::CreateProduction;
use rustaurant::recipes::{PriceRecipe, Recipe};
use rustaurant::{Branch, Commandable, Queryable, Rustaurant, Scope, Tenant};

#[derive(Debug, StructOpt)]
#[structopt(name = "rst", about = "Rustaurant back office")]
struct Opt {
    /// Configuration file
    #[structopt(parse(from_os_str))]
    config: PathBuf,
    #[structopt(subcommand)]
    command: Commands,
}

#[derive(Debug, StructOpt)]
struct ScopeOpt {
    #[structopt(long = "tenant")]
    tenant: Id<Tenant>,
    #[structopt(long = "branch")]
    branch: Id<Branch>,
}

#[derive(Debug, StructOpt)]
enum Commands {
    #[structopt(name = "setup", about = "Initialize the database")]
    Setup,
    #[structopt(name = "receive", about = "Record a delivery")]
    Receive {
        #[structopt(flatten)]
        scope: ScopeOpt,
        item: String,
        category: String,
        quantity: f64,
        unit: String,
        /// Cost per unit
        cost: f64,
        #[structopt(long = "expires", parse(try_from_str = parse_date))]
        expires: Option<NaiveDate>,
    },
    #[structopt(name = "stock", about = "Show stock on hand")]
    Stock {
        #[structopt(flatten)]
        scope: ScopeOpt,
        item: String,
        category: String,
    },
    #[structopt(name = "recipe-cost", about = "Price a recipe from recent purchases")]
    RecipeCost {
        #[structopt(flatten)]
        scope: ScopeOpt,
        recipe: Id<Recipe>,
        /// Use purchases from every branch of the tenant
        #[structopt(long = "tenant-wide")]
        tenant_wide: bool,
    },
    #[structopt(name = "produce", about = "Run a production")]
    Produce {
        #[structopt(flatten)]
        scope: ScopeOpt,
        recipe: Id<Recipe>,
        quantity: f64,
        #[structopt(long = "produced")]
        produced: Option<f64>,
        #[structopt(long = "batch")]
        batch_number: Option<String>,
        #[structopt(long = "notes")]
        notes: Option<String>,
    },
    #[structopt(name = "approvals", about = "List approval requests")]
    Approvals {
        #[structopt(long = "tenant")]
        tenant: Id<Tenant>,
        #[structopt(long = "branch")]
        branch: Option<Id<Branch>>,
        #[structopt(long = "pending")]
        pending: bool,
        #[structopt(long = "offset", default_value = "0")]
        offset: usize,
        #[structopt(long = "limit")]
        limit: Option<usize>,
    },
    #[structopt(name = "review", about = "Approve or reject a request")]
    Review {
        #[structopt(long = "tenant")]
        tenant: Id<Tenant>,
        id: Id<ApprovalRequest>,
        #[structopt(long = "reject")]
        reject: bool,
        #[structopt(long = "by")]
        reviewed_by: String,
        #[structopt(long = "comment")]
        comment: Option<String>,
    },
}

#[derive(Deserialize, Debug)]
struct Config {
    #[serde(flatten)]
    rustaurant: rustaurant::config::Config,
    env_logger: rustaurant::config::EnvLogger,
}

fn parse_date(input: &str) -> Result<NaiveDate, rustaurant::ServiceError> {
    parse_flexible_date(input)
}

impl ScopeOpt {
    fn scope(&self) -> Scope {
        Scope::new(self.tenant, self.branch)
    }
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    let mut config_buf = String::new();
    File::open(&opt.config)
        .with_context(|| format!("open {:?}", opt.config))?
        .read_to_string(&mut config_buf)?;
    let config: Config = toml::from_str(&config_buf)?;
    let settings = config.rustaurant.with_env_overrides()?;

    config.env_logger.builder().init();

    let rst = Rustaurant::new(&settings)?;

    match opt.command {
        Commands::Setup => {
            rst.setup()?;
        }
        Commands::Receive {
            scope,
            item,
            category,
            quantity,
            unit,
            cost,
            expires,
        } => {
            let batch = rst.inventory().execute(ReceiveStock {
                scope: scope.scope(),
                item_name: item,
                category,
                quantity,
                unit,
                cost,
                expiry_date: expires,
            })?;
            println!("{}", batch.id());
        }
        Commands::Stock {
            scope,
            item,
            category,
        } => {
            let level = rst.inventory().query(StockLevel {
                scope: scope.scope(),
                item_name: item,
                category,
            })?;
            println!("{}", level);
        }
        Commands::RecipeCost {
            scope,
            recipe,
            tenant_wide,
        } => {
            let cost = rst.recipes().query(PriceRecipe {
                scope: scope.scope(),
                id: recipe,
                tenant_wide,
            })?;
            println!("{:.4}", cost);
        }
        Commands::Produce {
            scope,
            recipe,
            quantity,
            produced,
            batch_number,
            notes,
        } => {
            let production = rst.production().execute(CreateProduction {
                scope: scope.scope(),
                recipe_id: recipe,
                planned_quantity: quantity,
                quantity_produced: produced,
                batch_number,
                notes,
            })?;
            println!(
                "{}: {} at {:.4} per unit",
                production.id(),
                production.batch_number,
                production.unit_cost
            );
            for usage in production.ingredient_usage {
                println!(
                    "  {} ({}): {} for {:.4}",
                    usage.ingredient_name, usage.category, usage.quantity_used, usage.cost_used
                );
            }
        }
        Commands::Approvals {
            tenant,
            branch,
            pending,
            offset,
            limit,
        } => {
            let page = rst.approvals().query(ListApprovals {
                tenant,
                branch,
                status: if pending {
                    Some(ReviewStatus::Pending)
                } else {
                    None
                },
                offset,
                limit,
                ..Default::default()
            })?;
            for request in page.items.iter() {
                println!(
                    "{}: {:?} {:?} by {}: {}",
                    request.id(),
                    request.review_status,
                    request.action_type,
                    request.submitted_by,
                    request.reason
                );
            }
            println!("({} of {})", page.items.len(), page.total);
        }
        Commands::Review {
            tenant,
            id,
            reject,
            reviewed_by,
            comment,
        } => {
            let decision = if reject {
                Decision::Reject
            } else {
                Decision::Approve
            };
            let request = rst
                .approvals()
                .execute(Review {
                    tenant,
                    id,
                    decision,
                    comment,
                    reviewed_by,
                })
                .context("review")?;
            println!("{}: {:?}", request.id(), request.review_status);
        }
    }

    Ok(())
}
