//! # Seed Data Generator
//!
//! Populates a development database with books, students and librarians.
//!
//! ## Usage
//! ```bash
//! # Default: ./libris_dev.db, 40 students
//! cargo run -p libris-db --bin seed
//!
//! # Custom path and student count
//! cargo run -p libris-db --bin seed -- --db ./data/libris.db --students 200
//! ```
//!
//! ## Generated Data
//! - One book per title below, 1 to 4 copies each, all free
//! - Students spread across years 1 to 6 (5 and 6 are graduate years)
//! - Two librarians

use chrono::Utc;
use libris_core::{Book, Condition, Librarian, Student};
use libris_db::{Database, DbConfig};
use std::env;
use uuid::Uuid;

const TITLES: &[&str] = &[
    "Structure and Interpretation of Computer Programs",
    "The Art of Computer Programming, Vol. 1",
    "Introduction to Algorithms",
    "Operating System Concepts",
    "Computer Networks",
    "Database System Concepts",
    "Compilers: Principles, Techniques, and Tools",
    "Types and Programming Languages",
    "The Rust Programming Language",
    "Linear Algebra Done Right",
    "Principles of Mathematical Analysis",
    "Concrete Mathematics",
    "Gödel, Escher, Bach",
    "A Brief History of Time",
    "The Selfish Gene",
    "Guns, Germs, and Steel",
    "Middlemarch",
    "One Hundred Years of Solitude",
    "The Master and Margarita",
    "Things Fall Apart",
];

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Grace", "Edsger", "Barbara", "Donald", "Frances", "John", "Radia", "Ken",
];

const LAST_NAMES: &[&str] = &[
    "Okafor", "Lindqvist", "Moreau", "Tanaka", "Novak", "Haddad", "Silva", "Kowalski",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut students: usize = 40;
    let mut db_path = String::from("./libris_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--students" | "-s" => {
                if i + 1 < args.len() {
                    students = args[i + 1].parse().unwrap_or(40);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Libris Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -s, --students <N>  Number of students to generate (default: 40)");
                println!("  -d, --db <PATH>     Database file path (default: ./libris_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Libris Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!("Students: {}", students);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.books().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} books", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();

    for (idx, title) in TITLES.iter().enumerate() {
        let copies = 1 + (idx % 4) as i64;
        let book = Book {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            total_copies: copies,
            available_copies: copies,
            is_active: true,
            condition: if idx % 5 == 0 {
                Condition::Excellent
            } else {
                Condition::Good
            },
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = db.books().insert(&book).await {
            eprintln!("Failed to insert {}: {}", book.title, e);
        }
    }
    println!("✓ Inserted {} books", TITLES.len());

    for idx in 0..students {
        let student = Student {
            id: Uuid::new_v4().to_string(),
            name: format!(
                "{} {}",
                FIRST_NAMES[idx % FIRST_NAMES.len()],
                LAST_NAMES[(idx / FIRST_NAMES.len()) % LAST_NAMES.len()]
            ),
            is_active: idx % 17 != 16,
            year_of_study: 1 + (idx % 6) as i64,
        };

        if let Err(e) = db.people().insert_student(&student).await {
            eprintln!("Failed to insert {}: {}", student.name, e);
        }
    }
    println!("✓ Inserted {} students", students);

    for name in ["Head Librarian", "Circulation Desk"] {
        let librarian = Librarian {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            is_active: true,
        };
        db.people().insert_librarian(&librarian).await?;
    }
    println!("✓ Inserted 2 librarians");

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
