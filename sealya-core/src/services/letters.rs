//! Letters service
//!
//! Owns the letter list: sealing new letters, the undo window, favorites,
//! scheduled unlocks and password protection. Every mutation flushes the
//! full list to storage.

use crate::clock::SharedClock;
use crate::config::{LETTERS_KEY, UNDO_WINDOW_SECS};
use crate::crypto;
use crate::database::{Letter, LetterDraft, Repository, Seal};
use crate::error::{AppError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Library ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LetterSort {
    /// Newest first
    #[default]
    Date,
    Title,
}

/// Library filter
#[derive(Debug, Clone, Default)]
pub struct LetterQuery {
    pub search: Option<String>,
    pub seal: Option<Seal>,
    pub sort: LetterSort,
}

/// Profile statistics over sealed letters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterStats {
    pub sealed: usize,
    pub letters_this_month: usize,
    pub favorites: usize,
    pub locked: usize,
    pub most_used_seal: Option<(Seal, usize)>,
    pub first_letter_at: Option<DateTime<Utc>>,
    pub days_since_first: i64,
}

/// Service for managing letters
#[derive(Clone)]
pub struct LettersService {
    repo: Repository,
    clock: SharedClock,
    letters: Arc<Mutex<Vec<Letter>>>,
}

impl LettersService {
    /// Load the stored list; an unreadable list starts empty
    pub async fn load(repo: Repository, clock: SharedClock) -> Result<Self> {
        let letters = match repo.get_json::<Vec<Letter>>(LETTERS_KEY).await {
            Ok(Some(letters)) => letters,
            Ok(None) => Vec::new(),
            Err(AppError::Serialization(e)) => {
                tracing::warn!("Stored letters are unreadable, starting empty: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracing::info!("Loaded {} letters", letters.len());

        Ok(Self {
            repo,
            clock,
            letters: Arc::new(Mutex::new(letters)),
        })
    }

    /// Re-read the list after another component replaced the stored record
    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::load(self.repo.clone(), Arc::clone(&self.clock)).await?;
        let letters = fresh.letters.lock().await.clone();
        *self.letters.lock().await = letters;
        Ok(())
    }

    /// Store `updated` and only then make it the in-memory list
    async fn commit(&self, letters: &mut Vec<Letter>, updated: Vec<Letter>) -> Result<()> {
        self.repo.set_json(LETTERS_KEY, &updated).await?;
        *letters = updated;
        Ok(())
    }

    /// Seal a new letter with a fresh undo window
    pub async fn add(&self, draft: LetterDraft) -> Result<Letter> {
        let now = self.clock.now();

        let letter = Letter {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            label: draft.label,
            content: draft.content,
            emoji: draft.emoji,
            timestamp: now,
            is_sealed: true,
            scheduled_for: draft.scheduled_for,
            is_favorite: false,
            can_undo: true,
            undo_expires_at: Some(now + Duration::seconds(UNDO_WINDOW_SECS)),
            protected_content: None,
        };

        let mut letters = self.letters.lock().await;
        let mut updated = letters.clone();
        updated.push(letter.clone());
        self.commit(&mut letters, updated).await?;

        tracing::info!("Sealed letter {}", letter.id);
        Ok(letter)
    }

    /// Remove a letter; unknown ids are ignored
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut letters = self.letters.lock().await;
        let mut updated = letters.clone();
        updated.retain(|letter| letter.id != id);

        if updated.len() == letters.len() {
            tracing::debug!("Delete ignored, no letter {}", id);
            return Ok(());
        }

        self.commit(&mut letters, updated).await?;
        tracing::info!("Deleted letter {}", id);
        Ok(())
    }

    pub async fn toggle_favorite(&self, id: &str) -> Result<()> {
        let mut letters = self.letters.lock().await;
        let mut updated = letters.clone();

        let Some(letter) = updated.iter_mut().find(|letter| letter.id == id) else {
            return Ok(());
        };
        letter.is_favorite = !letter.is_favorite;

        self.commit(&mut letters, updated).await
    }

    /// Discard a letter inside its undo window.
    ///
    /// Returns whether the letter was removed; past the deadline the
    /// letter is left intact.
    pub async fn undo(&self, id: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut letters = self.letters.lock().await;

        let Some(index) = letters.iter().position(|letter| letter.id == id) else {
            return Ok(false);
        };

        if !letters[index].undo_available(now) {
            tracing::debug!("Undo window closed for letter {}", id);
            return Ok(false);
        }

        let mut updated = letters.clone();
        updated.remove(index);
        self.commit(&mut letters, updated).await?;

        tracing::info!("Undid letter {}", id);
        Ok(true)
    }

    /// Clear undo flags whose window has closed; returns how many changed
    pub async fn expire_undo_windows(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut letters = self.letters.lock().await;
        let mut updated = letters.clone();
        let mut expired = 0;

        for letter in updated.iter_mut() {
            if letter.can_undo && !letter.undo_available(now) {
                letter.can_undo = false;
                letter.undo_expires_at = None;
                expired += 1;
            }
        }

        if expired > 0 {
            self.commit(&mut letters, updated).await?;
            tracing::debug!("Closed {} undo windows", expired);
        }

        Ok(expired)
    }

    /// Snapshot of every letter with undo flags reflecting `now`
    pub async fn list(&self) -> Vec<Letter> {
        let now = self.clock.now();
        self.letters
            .lock()
            .await
            .iter()
            .cloned()
            .map(|mut letter| {
                if !letter.undo_available(now) {
                    letter.can_undo = false;
                }
                letter
            })
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Letter> {
        self.list().await.into_iter().find(|letter| letter.id == id)
    }

    /// Whether the letter may be opened now; unknown ids are not openable
    pub async fn can_open(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.letters
            .lock()
            .await
            .iter()
            .any(|letter| letter.id == id && !letter.is_locked(now))
    }

    /// Letters available for reading now
    pub async fn open_letters(&self) -> Vec<Letter> {
        let now = self.clock.now();
        self.list()
            .await
            .into_iter()
            .filter(|letter| !letter.is_locked(now))
            .collect()
    }

    /// Letters still waiting for their unlock time
    pub async fn locked_letters(&self) -> Vec<Letter> {
        let now = self.clock.now();
        self.list()
            .await
            .into_iter()
            .filter(|letter| letter.is_locked(now))
            .collect()
    }

    /// Sealed letters matching the library filters
    pub async fn query(&self, query: &LetterQuery) -> Vec<Letter> {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matched: Vec<Letter> = self
            .list()
            .await
            .into_iter()
            .filter(|letter| letter.is_sealed)
            .filter(|letter| query.seal.map_or(true, |seal| letter.emoji == seal))
            .filter(|letter| match &needle {
                Some(needle) => {
                    letter.title.to_lowercase().contains(needle)
                        || letter.label.to_lowercase().contains(needle)
                        || letter.content.to_lowercase().contains(needle)
                }
                None => true,
            })
            .collect();

        match query.sort {
            LetterSort::Date => matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            LetterSort::Title => {
                matched.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
            }
        }

        matched
    }

    pub async fn stats(&self) -> LetterStats {
        let now = self.clock.now();
        let local_now = self.clock.local_now();
        let offset = self.clock.offset();
        let sealed: Vec<Letter> = self
            .list()
            .await
            .into_iter()
            .filter(|letter| letter.is_sealed)
            .collect();

        let letters_this_month = sealed
            .iter()
            .filter(|letter| {
                let local = letter.timestamp.with_timezone(&offset);
                local.year() == local_now.year() && local.month() == local_now.month()
            })
            .count();

        let mut seal_counts: HashMap<Seal, usize> = HashMap::new();
        for letter in &sealed {
            *seal_counts.entry(letter.emoji).or_default() += 1;
        }
        // Ties resolve to the earlier seal in catalog order
        let most_used_seal = Seal::ALL
            .into_iter()
            .filter_map(|seal| seal_counts.get(&seal).map(|count| (seal, *count)))
            .fold(None, |best: Option<(Seal, usize)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            });

        let first_letter_at = sealed.iter().map(|letter| letter.timestamp).min();
        let days_since_first = first_letter_at
            .map(|first| (now - first).num_days())
            .unwrap_or(0);

        LetterStats {
            sealed: sealed.len(),
            letters_this_month,
            favorites: sealed.iter().filter(|letter| letter.is_favorite).count(),
            locked: sealed.iter().filter(|letter| letter.is_locked(now)).count(),
            most_used_seal,
            first_letter_at,
            days_since_first,
        }
    }

    /// Encrypt a letter's content under `password`
    pub async fn protect(&self, id: &str, password: &str) -> Result<()> {
        let mut letters = self.letters.lock().await;
        let mut updated = letters.clone();

        let letter = updated
            .iter_mut()
            .find(|letter| letter.id == id)
            .ok_or_else(|| AppError::LetterNotFound(id.to_string()))?;

        if letter.is_protected() {
            return Err(AppError::Crypto(format!("Letter {} is already protected", id)));
        }

        letter.protected_content = Some(crypto::encrypt_text(&letter.content, password)?);
        letter.content.clear();

        self.commit(&mut letters, updated).await?;
        tracing::info!("Protected letter {}", id);
        Ok(())
    }

    /// Decrypted content of a protected letter, honoring its schedule lock
    pub async fn read_protected(&self, id: &str, password: &str) -> Result<String> {
        let now = self.clock.now();
        let letters = self.letters.lock().await;

        let letter = letters
            .iter()
            .find(|letter| letter.id == id)
            .ok_or_else(|| AppError::LetterNotFound(id.to_string()))?;

        if letter.is_locked(now) {
            return Err(AppError::Generic(format!("Letter {} is still locked", id)));
        }

        match &letter.protected_content {
            Some(encrypted) => crypto::decrypt_text(encrypted, password),
            None => Ok(letter.content.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::database::create_memory_pool;
    use chrono::TimeZone;

    fn draft(title: &str, seal: Seal) -> LetterDraft {
        LetterDraft {
            title: title.to_string(),
            label: String::new(),
            content: format!("{} body", title),
            emoji: seal,
            scheduled_for: None,
        }
    }

    async fn create_test_service() -> (LettersService, Arc<ManualClock>, Repository) {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 10, 9, 0, 0).unwrap());
        let service = LettersService::load(repo.clone(), clock.clone()).await.unwrap();
        (service, clock, repo)
    }

    #[tokio::test]
    async fn test_add_seals_with_undo_window() {
        let (service, clock, _repo) = create_test_service().await;

        let letter = service
            .add(LetterDraft {
                title: "Hello".to_string(),
                label: String::new(),
                content: "World".to_string(),
                emoji: Seal::Heart,
                scheduled_for: None,
            })
            .await
            .unwrap();

        assert!(letter.is_sealed);
        assert!(letter.can_undo);
        assert_eq!(letter.undo_expires_at, Some(clock.now() + Duration::seconds(10)));

        clock.advance(Duration::seconds(10));
        let listed = service.get(&letter.id).await.unwrap();
        assert!(!listed.can_undo);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let (service, clock, repo) = create_test_service().await;
        let kept = service.add(draft("Kept", Seal::Heart)).await.unwrap();
        clock.advance(Duration::seconds(2));

        repo.pool().close().await;

        assert!(service.add(draft("Lost", Seal::Heart)).await.is_err());
        assert!(service.toggle_favorite(&kept.id).await.is_err());
        assert!(service.undo(&kept.id).await.is_err());

        let letters = service.list().await;
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].id, kept.id);
        assert!(!letters[0].is_favorite);
    }

    #[tokio::test]
    async fn test_undo_inside_window_removes() {
        let (service, clock, _repo) = create_test_service().await;
        let letter = service.add(draft("Oops", Seal::Sparkles)).await.unwrap();

        clock.advance(Duration::seconds(9));

        assert!(service.undo(&letter.id).await.unwrap());
        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_undo_after_window_is_noop() {
        let (service, clock, _repo) = create_test_service().await;
        let letter = service.add(draft("Keep", Seal::Sparkles)).await.unwrap();

        clock.advance(Duration::seconds(11));

        assert!(!service.undo(&letter.id).await.unwrap());
        assert_eq!(service.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_letter_keeps_first_window() {
        let (service, clock, _repo) = create_test_service().await;
        let first = service.add(draft("First", Seal::Heart)).await.unwrap();
        clock.advance(Duration::seconds(5));
        let _second = service.add(draft("Second", Seal::Heart)).await.unwrap();

        clock.advance(Duration::seconds(3));

        assert!(service.undo(&first.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_unknown_id() {
        let (service, _clock, repo) = create_test_service().await;
        let letter = service.add(draft("Bye", Seal::Bubbles)).await.unwrap();

        service.delete("missing").await.unwrap();
        assert_eq!(service.list().await.len(), 1);

        service.delete(&letter.id).await.unwrap();
        let stored: Vec<Letter> = repo.get_json(LETTERS_KEY).await.unwrap().unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_favorite_persists() {
        let (service, clock, repo) = create_test_service().await;
        let letter = service.add(draft("Fav", Seal::Blossom)).await.unwrap();

        service.toggle_favorite(&letter.id).await.unwrap();
        service.toggle_favorite("missing").await.unwrap();

        let reloaded = LettersService::load(repo, clock).await.unwrap();
        assert!(reloaded.get(&letter.id).await.unwrap().is_favorite);
    }

    #[tokio::test]
    async fn test_scheduled_letter_unlocks_at_time() {
        let (service, clock, _repo) = create_test_service().await;
        let unlock_at = clock.now() + Duration::days(1);
        let letter = service
            .add(LetterDraft {
                scheduled_for: Some(unlock_at),
                ..draft("Later", Seal::Cyclone)
            })
            .await
            .unwrap();

        assert!(!service.can_open(&letter.id).await);
        assert_eq!(service.locked_letters().await.len(), 1);

        clock.set(unlock_at);

        assert!(service.can_open(&letter.id).await);
        assert_eq!(service.open_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_store_loads_empty() {
        let repo = Repository::new(create_memory_pool().await.unwrap());
        repo.set_item(LETTERS_KEY, "[{broken").await.unwrap();
        let clock = ManualClock::new(Utc::now());

        let service = LettersService::load(repo, clock).await.unwrap();

        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_expire_undo_windows_persists() {
        let (service, clock, repo) = create_test_service().await;
        service.add(draft("A", Seal::Heart)).await.unwrap();

        assert_eq!(service.expire_undo_windows().await.unwrap(), 0);
        clock.advance(Duration::seconds(30));
        assert_eq!(service.expire_undo_windows().await.unwrap(), 1);

        let stored: Vec<Letter> = repo.get_json(LETTERS_KEY).await.unwrap().unwrap();
        assert!(!stored[0].can_undo);
        assert!(stored[0].undo_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_query_search_filter_sort() {
        let (service, clock, _repo) = create_test_service().await;
        service.add(draft("Banana", Seal::Heart)).await.unwrap();
        clock.advance(Duration::minutes(1));
        service.add(draft("apple", Seal::Sparkles)).await.unwrap();
        clock.advance(Duration::minutes(1));
        service.add(draft("Cherry", Seal::Heart)).await.unwrap();

        let by_date = service.query(&LetterQuery::default()).await;
        assert_eq!(by_date[0].title, "Cherry");

        let by_title = service
            .query(&LetterQuery {
                sort: LetterSort::Title,
                ..Default::default()
            })
            .await;
        let titles: Vec<&str> = by_title.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["apple", "Banana", "Cherry"]);

        let hearts = service
            .query(&LetterQuery {
                seal: Some(Seal::Heart),
                search: Some("CHERRY".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(hearts.len(), 1);
        assert_eq!(hearts[0].title, "Cherry");
    }

    #[tokio::test]
    async fn test_stats() {
        let (service, clock, _repo) = create_test_service().await;
        service.add(draft("One", Seal::Heart)).await.unwrap();
        service.add(draft("Two", Seal::Heart)).await.unwrap();
        let third = service.add(draft("Three", Seal::Bubbles)).await.unwrap();
        service.toggle_favorite(&third.id).await.unwrap();

        clock.advance(Duration::days(30));
        let stats = service.stats().await;

        assert_eq!(stats.sealed, 3);
        assert_eq!(stats.letters_this_month, 0);
        assert_eq!(stats.favorites, 1);
        assert_eq!(stats.most_used_seal, Some((Seal::Heart, 2)));
        assert_eq!(stats.days_since_first, 30);
    }

    #[tokio::test]
    async fn test_protect_and_read() {
        let (service, _clock, _repo) = create_test_service().await;
        let letter = service.add(draft("Secret", Seal::Heart)).await.unwrap();

        service.protect(&letter.id, "moonlight").await.unwrap();

        let stored = service.get(&letter.id).await.unwrap();
        assert!(stored.content.is_empty());
        assert!(stored.is_protected());

        assert_eq!(
            service.read_protected(&letter.id, "moonlight").await.unwrap(),
            "Secret body"
        );
        assert!(service.read_protected(&letter.id, "sunlight").await.is_err());
        assert!(service.protect(&letter.id, "again").await.is_err());
    }

    #[tokio::test]
    async fn test_read_protected_respects_lock() {
        let (service, clock, _repo) = create_test_service().await;
        let letter = service
            .add(LetterDraft {
                scheduled_for: Some(clock.now() + Duration::hours(2)),
                ..draft("Future", Seal::Heart)
            })
            .await
            .unwrap();

        assert!(service.read_protected(&letter.id, "pw").await.is_err());
        assert!(matches!(
            service.read_protected("missing", "pw").await,
            Err(AppError::LetterNotFound(_))
        ));
    }
}
