use std::env;
use std::process;

use domain::adapters::memory_repo::InMemoryStore;
use domain::money::format_usd;
use domain::service::{ExpenseService, DEFAULT_RECENT_LIMIT};
use domain::{ExpenseInput, UserId};

fn print_usage() {
    eprintln!(
        "{}\n\nUsage:\n  domain add <amount> [description...]\n  domain demo\n\nNotes:\n  - This demo CLI uses an in-memory repository; data is not persisted across runs.",
        domain::about()
    );
}

fn run() -> Result<(), String> {
    let mut args = env::args().skip(1); // skip program name

    let Some(cmd) = args.next() else {
        print_usage();
        return Ok(());
    };

    // Construct a demo service with in-memory storage and a fixed demo user
    let svc = ExpenseService::new(InMemoryStore::new());
    let user = UserId::new("demo-user").map_err(|e| e.to_string())?;

    match cmd.as_str() {
        "add" => {
            let Some(raw) = args.next() else {
                return Err("missing <amount> for add".into());
            };
            let amount: f64 = raw
                .parse()
                .map_err(|_| format!("not a number: {raw}"))?;
            let description = args.collect::<Vec<_>>().join(" ");

            let id = svc
                .create(Some(&user), ExpenseInput { amount, description })
                .map_err(|e| e.to_string())?;
            println!("added expense {id} ({})", format_usd(amount));
            Ok(())
        }
        "demo" => {
            for (amount, desc) in [
                (4.75, "coffee"),
                (23.10, "groceries"),
                (1200.0, "rent"),
                (9.99, "streaming"),
            ] {
                svc.create(
                    Some(&user),
                    ExpenseInput {
                        amount,
                        description: desc.into(),
                    },
                )
                .map_err(|e| e.to_string())?;
            }

            println!("recent expenses:");
            let recent = svc
                .recent(Some(&user), DEFAULT_RECENT_LIMIT)
                .map_err(|e| e.to_string())?;
            for e in &recent {
                println!("  {:<12} {:>12}  {}", e.id, format_usd(e.amount), e.description);
            }
            let total = svc.total(Some(&user)).map_err(|e| e.to_string())?;
            println!("total: {}", format_usd(total));
            Ok(())
        }
        _ => {
            print_usage();
            Err(format!("unknown command: {cmd}"))
        }
    }
}

fn main() {
    if let Err(msg) = run() {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}
