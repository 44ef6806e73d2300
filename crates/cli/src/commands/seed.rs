use chrono::Utc;
use helpline_core::domain::faq::FaqEntry;
use helpline_db::{repositories::FaqRepository, Repositories};

use crate::commands::{open_migrated, prepare, CommandResult};

/// Starter FAQ set: (question, answer, category).
pub const STARTER_FAQS: &[(&str, &str, &str)] = &[
    (
        "How do I reset my password?",
        "Open the sign-in page, choose \"Forgot password\" and follow the link sent to your registered email. The link expires after 30 minutes.",
        "accounts",
    ),
    (
        "How do I connect to the office Wi-Fi?",
        "Select the staff network, sign in with your work username and password, and accept the certificate prompt the first time you connect.",
        "network",
    ),
    (
        "My computer is running slow",
        "Restart the computer, close programs you are not using, and make sure pending updates are installed. If it is still slow, reply with the model and what you were doing.",
        "hardware",
    ),
    (
        "How do I set up email on my phone?",
        "Install the mail app, add a work account with your full email address, and approve the sign-in request on your registered device.",
        "email",
    ),
    (
        "The printer is not working",
        "Check that the printer is on and has paper, then remove and re-add it from your printer settings. Reply with the printer name if the problem continues.",
        "hardware",
    ),
];

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let repos = Repositories::sql(pool.clone());
        let outcome = seed_faqs(repos.faqs.as_ref()).await;
        pool.close().await;
        outcome
    });

    match result {
        Ok(SeedOutput { inserted, existing }) => CommandResult::success(
            "seed",
            format!("starter FAQ set loaded: {inserted} inserted, {existing} already present"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SeedOutput {
    pub inserted: usize,
    pub existing: usize,
}

pub async fn seed_faqs(
    faqs: &dyn FaqRepository,
) -> Result<SeedOutput, (&'static str, String, u8)> {
    let present = faqs.list().await.map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
    let mut output = SeedOutput { inserted: 0, existing: 0 };

    for (question, answer, category) in STARTER_FAQS {
        if already_present(&present, question) {
            output.existing += 1;
            continue;
        }
        faqs.add(question, answer, Some(category), Utc::now())
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        output.inserted += 1;
    }

    Ok(output)
}

fn already_present(entries: &[FaqEntry], question: &str) -> bool {
    entries.iter().any(|entry| entry.question.trim().eq_ignore_ascii_case(question.trim()))
}

#[cfg(test)]
mod tests {
    use helpline_db::{InMemoryStore, Repositories};

    use super::{seed_faqs, SeedOutput, STARTER_FAQS};

    #[tokio::test]
    async fn seeding_twice_inserts_each_question_once() {
        let repos = Repositories::in_memory(InMemoryStore::new());

        let first = seed_faqs(repos.faqs.as_ref()).await.expect("first seed");
        assert_eq!(first, SeedOutput { inserted: STARTER_FAQS.len(), existing: 0 });

        let second = seed_faqs(repos.faqs.as_ref()).await.expect("second seed");
        assert_eq!(second, SeedOutput { inserted: 0, existing: STARTER_FAQS.len() });
        assert_eq!(repos.faqs.list().await.expect("list").len(), STARTER_FAQS.len());
    }

    #[tokio::test]
    async fn seeded_questions_are_matched_by_the_faq_lookup() {
        let repos = Repositories::in_memory(InMemoryStore::new());
        seed_faqs(repos.faqs.as_ref()).await.expect("seed");

        let hit = repos.faqs.find_match("reset my password", 4).await.expect("lookup");
        assert_eq!(hit.map(|entry| entry.category), Some(Some("accounts".to_string())));
    }
}
