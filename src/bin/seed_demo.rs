use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;

use mistake_notebook::auth::hash_password;
use mistake_notebook::database::{sqlite_file_path, Database, QuestionFields};

const DEMO_USERNAME: &str = "admin";
const DEMO_PASSWORD: &str = "123456";

struct SubjectSeed {
    name: &'static str,
    color: &'static str,
    icon: &'static str,
}

const SUBJECTS: &[SubjectSeed] = &[
    SubjectSeed { name: "Math", color: "#4299e1", icon: "fas fa-calculator" },
    SubjectSeed { name: "Chinese", color: "#48bb78", icon: "fas fa-book" },
    SubjectSeed { name: "English", color: "#ed8936", icon: "fas fa-language" },
    SubjectSeed { name: "Physics", color: "#9f7aea", icon: "fas fa-atom" },
    SubjectSeed { name: "Chemistry", color: "#38b2ac", icon: "fas fa-flask" },
];

struct QuestionSeed {
    subject: &'static str,
    question_type: &'static str,
    title: &'static str,
    content: &'static str,
    answer: &'static str,
    error_reason: &'static str,
    difficulty: i64,
}

const QUESTIONS: &[QuestionSeed] = &[
    QuestionSeed {
        subject: "Math",
        question_type: "single_choice",
        title: "Slope of a linear function",
        content: "Find the slope of y = 3x - 2.",
        answer: "3",
        error_reason: "Forgot that the coefficient of x is the slope",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "single_choice",
        title: "Factoring a quadratic",
        content: "Factor x^2 - 5x + 6.",
        answer: "(x-2)(x-3)",
        error_reason: "Sign of the constant term handled wrongly",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "essay",
        title: "Minimum of a quadratic",
        content: "Find the minimum of f(x) = x^2 - 4x + 1.",
        answer: "-3",
        error_reason: "Mistake while completing the square",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "single_choice",
        title: "Arithmetic series sum",
        content: "First term 2, common difference 3. Sum of the first 10 terms?",
        answer: "155",
        error_reason: "Substituted into the formula off by one",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "judgement",
        title: "Absolute value inequality",
        content: "The solution set of |x-3| < 2 is (1, 5).",
        answer: "True",
        error_reason: "Wrote the interval as closed",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "single_choice",
        title: "Point to line distance",
        content: "Distance from (1, 2) to the line x + y = 4.",
        answer: "√2/2",
        error_reason: "Plugged values into the distance formula incorrectly",
        difficulty: 3,
    },
    QuestionSeed {
        subject: "Math",
        question_type: "single_choice",
        title: "Permutations",
        content: "How many ways to line up 2 people chosen from 5?",
        answer: "20",
        error_reason: "Ignored order",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Chinese",
        question_type: "essay",
        title: "Classical Chinese translation",
        content: "Translate \"学而不思则罔\".",
        answer: "Learning without thinking leads to confusion",
        error_reason: "Subject and object order reversed",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Chinese",
        question_type: "single_choice",
        title: "Rhetorical devices",
        content: "Which device is used in \"白发三千丈\"?",
        answer: "Hyperbole",
        error_reason: "Confused hyperbole with metaphor",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "English",
        question_type: "single_choice",
        title: "Present perfect tense",
        content: "I ___ (live) here since 2010.",
        answer: "have lived",
        error_reason: "Used simple past with 'since'",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "English",
        question_type: "fill_blank",
        title: "Relative pronouns",
        content: "This is the book ___ I bought yesterday.",
        answer: "that",
        error_reason: "Used 'what' as a relative pronoun",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Physics",
        question_type: "single_choice",
        title: "Newton's second law",
        content: "A 2 kg mass accelerates at 3 m/s^2. What is the net force?",
        answer: "6 N",
        error_reason: "Divided instead of multiplied",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "Physics",
        question_type: "essay",
        title: "Projectile range",
        content: "At which launch angle is the range maximal on flat ground?",
        answer: "45 degrees",
        error_reason: "Assumed a steeper angle goes further",
        difficulty: 2,
    },
    QuestionSeed {
        subject: "Chemistry",
        question_type: "single_choice",
        title: "Balancing equations",
        content: "Balance H2 + O2 -> H2O.",
        answer: "2H2 + O2 -> 2H2O",
        error_reason: "Oxygen atoms not balanced",
        difficulty: 1,
    },
    QuestionSeed {
        subject: "Chemistry",
        question_type: "single_choice",
        title: "Molar mass",
        content: "What is the molar mass of CO2?",
        answer: "44 g/mol",
        error_reason: "Counted only one oxygen atom",
        difficulty: 2,
    },
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    let reset = args.iter().any(|a| a == "--reset");
    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/app.db?mode=rwc".to_string());

    println!("=== Mistake Notebook Demo Seeder ===");
    println!("Database: {}", database_url);

    if reset {
        if let Some(path) = sqlite_file_path(&database_url) {
            if path.exists() {
                std::fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
                println!("Removed existing database at {}", path.display());
            }
        }
    }

    let db = Database::new(&database_url).await?;
    if db.has_users().await? {
        println!("Database already has users, nothing to seed. Pass --reset to start over.");
        return Ok(());
    }

    let password_hash = hash_password(DEMO_PASSWORD)?;
    let admin = db.create_user(DEMO_USERNAME, &password_hash, DEMO_USERNAME).await?;
    println!("Created user '{}' (password '{}')", DEMO_USERNAME, DEMO_PASSWORD);

    let mut subject_ids = HashMap::new();
    for (index, seed) in SUBJECTS.iter().enumerate() {
        let subject = db
            .create_subject(admin.id, seed.name, seed.color, seed.icon, index as i64 + 1)
            .await?;
        subject_ids.insert(seed.name, subject.id);
    }
    println!("Created {} subjects", subject_ids.len());

    let mut created = 0;
    for seed in QUESTIONS {
        let Some(subject_id) = subject_ids.get(seed.subject).copied() else {
            continue;
        };
        let fields = QuestionFields {
            subject_id: Some(subject_id),
            question_type: seed.question_type.to_string(),
            title: seed.title.to_string(),
            content: Some(seed.content.to_string()),
            answer: Some(seed.answer.to_string()),
            error_reason: Some(seed.error_reason.to_string()),
            difficulty: seed.difficulty,
            ..Default::default()
        };
        db.create_question(admin.id, &fields).await?;
        created += 1;
    }
    println!("Created {} sample questions", created);
    println!("\nDone. Sign in with {} / {}", DEMO_USERNAME, DEMO_PASSWORD);

    Ok(())
}
