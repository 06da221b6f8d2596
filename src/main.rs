//! gostore: command-line entry point.

use clap::Parser;

use gostore::cli::{self, Cli, Commands};
use gostore::db::{Config, Engine};
use gostore::error::Result;
use gostore::txn::{Operation, Transaction, TransactionObject};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let token_range = cli::parse_token_range(&args.token_range)?;
    let engine = Engine::open(Config::new(args.data_dir.clone(), token_range)).await?;

    match args.command {
        Commands::CreateContainer { name } => {
            engine.create_container(&name).await;
            println!("created container {name:?}");
        }
        Commands::Set { container, key, value } => {
            engine.create_container(&container).await;
            let mut txn = Transaction::new(token_range.0);
            let v = txn.declare_variable();
            txn.master.operations.push(Operation::Set {
                dest: TransactionObject::variable(0, v),
                value: TransactionObject::literal(value),
                partial: false,
            });
            txn.master.operations.push(Operation::Set {
                dest: TransactionObject::db_object(&container, &key),
                value: TransactionObject::variable(0, v),
                partial: false,
            });
            let result = engine.execute(txn).await;
            match result.error {
                Some(e) => eprintln!("transaction {} failed: {e}", result.id),
                None => println!("set {container}.{key}"),
            }
        }
        Commands::Get { container, key } => {
            let mut txn = Transaction::new(token_range.0);
            txn.master.operations.push(Operation::Return {
                args: vec![TransactionObject::db_object(&container, &key)],
            });
            let result = engine.execute(txn).await;
            match result.error {
                Some(e) => eprintln!("transaction {} failed: {e}", result.id),
                None => println!("{}", cli::format_value(&result.returns[0])),
            }
        }
        Commands::Demo => {
            engine.create_container("demo").await;
            let mut txn = Transaction::new(token_range.0);
            let v = txn.declare_variable();
            let dest = txn.declare_variable();
            txn.master.operations.push(Operation::Set {
                dest: TransactionObject::variable(0, v),
                value: TransactionObject::literal("x"),
                partial: false,
            });
            txn.master.operations.push(Operation::Set {
                dest: TransactionObject::db_object("demo", "k"),
                value: TransactionObject::variable(0, v),
                partial: false,
            });
            txn.master.operations.push(Operation::Get {
                src: TransactionObject::db_object("demo", "k"),
                dest: TransactionObject::variable(0, dest),
            });
            txn.master.operations.push(Operation::Return {
                args: vec![TransactionObject::variable(0, v), TransactionObject::variable(0, dest)],
            });
            let result = engine.execute(txn).await;
            match result.error {
                Some(e) => eprintln!("demo transaction failed: {e}"),
                None => {
                    let rendered: Vec<String> = result.returns.iter().map(cli::format_value).collect();
                    println!("returns: [{}]", rendered.join(", "));
                }
            }
        }
    }

    engine.close_all();
    Ok(())
}
