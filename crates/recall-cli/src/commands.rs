use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use image::RgbImage;
use recall_core::{
    AnnounceMode, DescriptorExtractor, Detection, EnrollmentSession, EnrollmentState, FrameSource,
    GalleryCache, ImageFile, Notifier, OnnxExtractor, Person, PersonDetails, PersonStore,
    PhotoEntry, PhotoStatus, RecognitionAttempt, RecognitionResult, RecognitionService,
    RecognitionSettings, SilentNotifier,
};
use recall_hw::{Camera, SharedCamera, SpeechNotifier};
use recall_store::{EmbeddingCipher, SqliteStore};

use crate::config::{self, Config};

const MIN_WATCH_INTERVAL_MS: u64 = 100;

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let cipher = if config.encrypt_embeddings {
        let cipher = EmbeddingCipher::load_or_create(&config.key_path)
            .context("cannot load the embedding encryption key")?;
        Some(cipher)
    } else {
        None
    };
    let store = SqliteStore::open(&config.db_path, cipher)
        .await
        .with_context(|| format!("cannot open person store at {}", config.db_path.display()))?;
    Ok(Arc::new(store))
}

/// Spawn the inference engine and wait for both models to load.
async fn start_extractor(config: &Config) -> Result<Arc<OnnxExtractor>> {
    let extractor = OnnxExtractor::spawn(config.scrfd_model_path(), config.arcface_model_path())?;
    extractor
        .wait_ready()
        .await
        .with_context(|| format!("face models unavailable in {}", config.model_dir.display()))?;
    Ok(Arc::new(extractor))
}

/// Stand-in extractor for sessions that never look at a photo.
struct ModelsNotLoaded;

#[async_trait]
impl DescriptorExtractor for ModelsNotLoaded {
    async fn detect(&self, _image: RgbImage) -> recall_core::Result<Vec<Detection>> {
        Err(recall_core::Error::NotReady("face models not loaded".into()))
    }
}

fn photo_refs(photos: &[PathBuf]) -> Vec<String> {
    photos
        .iter()
        .map(|p| {
            std::fs::canonicalize(p)
                .unwrap_or_else(|_| p.clone())
                .display()
                .to_string()
        })
        .collect()
}

pub async fn enroll(
    config: &Config,
    photos: Vec<PathBuf>,
    name: String,
    relationship: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;
    let extractor = start_extractor(config).await?;

    let mut session = EnrollmentSession::new(extractor, store, Arc::new(GalleryCache::new()));
    session.select_photos(photo_refs(&photos));
    let state = session.validate().await.clone();
    print_photos(session.photos());
    if state == EnrollmentState::Invalid {
        bail!("none of the photos shows exactly one detectable face");
    }

    let person = session
        .save(PersonDetails {
            name,
            relationship,
            notes,
        })
        .await?;
    println!("Enrolled {} ({})", person.name, person.id);
    Ok(())
}

pub async fn edit(
    config: &Config,
    id: &str,
    photos: Vec<PathBuf>,
    name: Option<String>,
    relationship: Option<String>,
    notes: Option<String>,
) -> Result<()> {
    let store = open_store(config).await?;
    let extractor: Arc<dyn DescriptorExtractor> = if photos.is_empty() {
        Arc::new(ModelsNotLoaded)
    } else {
        start_extractor(config).await?
    };

    let mut session =
        EnrollmentSession::edit(extractor, store, Arc::new(GalleryCache::new()), id).await?;
    let existing = session
        .editing()
        .cloned()
        .context("edit session lost its person")?;

    if !photos.is_empty() {
        session.select_photos(photo_refs(&photos));
        let state = session.validate().await.clone();
        print_photos(session.photos());
        if state == EnrollmentState::Invalid {
            bail!("none of the new photos shows exactly one detectable face; nothing changed");
        }
    }

    let details = PersonDetails {
        name: name.unwrap_or(existing.name),
        relationship: relationship.or(existing.relationship),
        notes: notes.or(existing.notes),
    };
    let person = session.save(details).await?;
    println!("Updated {} ({})", person.name, person.id);
    Ok(())
}

pub struct RecognizeOptions {
    pub image: Option<PathBuf>,
    pub threshold: Option<f32>,
    pub announce: Option<AnnounceMode>,
    pub watch: bool,
    pub interval_ms: u64,
}

pub async fn recognize(config: &Config, options: RecognizeOptions) -> Result<()> {
    let settings = RecognitionSettings {
        threshold: options.threshold.unwrap_or(config.match_threshold),
        announce: options.announce.unwrap_or(config.announce),
    };
    config::validate_threshold(settings.threshold)?;

    let store = open_store(config).await?;
    let extractor = start_extractor(config).await?;

    let (frames, camera): (Arc<dyn FrameSource>, Option<SharedCamera>) = match options.image {
        Some(path) => (Arc::new(ImageFile::new(path)), None),
        None => {
            let camera = Camera::open_default(config.camera_device.as_deref(), config.warmup_frames)
                .context("cannot open camera")?;
            let camera = SharedCamera::new(camera);
            (Arc::new(camera.clone()), Some(camera))
        }
    };

    let notifier: Arc<dyn Notifier> = match settings.announce {
        AnnounceMode::None => Arc::new(SilentNotifier),
        _ if options.watch => Arc::new(ChangeOnlyNotifier::new(SpeechNotifier::new(
            config.speech_command.clone(),
        ))),
        _ => Arc::new(SpeechNotifier::new(config.speech_command.clone())),
    };

    let service = RecognitionService::new(
        extractor,
        store,
        Arc::new(GalleryCache::new()),
        frames,
        notifier,
        settings,
    );

    if options.watch {
        watch(&service, options.interval_ms).await?;
    } else if let RecognitionAttempt::Completed(result) = service.recognize().await {
        print_result(&result);
    }
    service.flush().await;

    if let Some(camera) = camera {
        camera.stop();
    }
    Ok(())
}

/// Recognize repeatedly until Ctrl-C, printing only when the outcome changes.
async fn watch(service: &RecognitionService, interval_ms: u64) -> Result<()> {
    let mut ticker =
        tokio::time::interval(Duration::from_millis(interval_ms.max(MIN_WATCH_INTERVAL_MS)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    println!("Watching; press Ctrl-C to stop.");
    let mut last_line = String::new();
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("cannot listen for Ctrl-C")?;
                break;
            }
            _ = ticker.tick() => {
                if let RecognitionAttempt::Completed(result) = service.recognize().await {
                    let line = summary(&result);
                    if line != last_line {
                        print_result(&result);
                        last_line = line;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Passes an announcement through only when it differs from the previous one,
/// so watch mode does not repeat a name every frame.
struct ChangeOnlyNotifier<N> {
    inner: N,
    last: Mutex<Option<String>>,
}

impl<N> ChangeOnlyNotifier<N> {
    fn new(inner: N) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<N: Notifier> Notifier for ChangeOnlyNotifier<N> {
    async fn announce(&self, text: &str) {
        {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(text) {
                return;
            }
            *last = Some(text.to_string());
        }
        self.inner.announce(text).await;
    }
}

pub async fn list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let people = store.list().await?;
    if people.is_empty() {
        println!("No people enrolled.");
        return Ok(());
    }

    println!("{:<36}  {:<24}  {:<16}  LAST SEEN", "ID", "NAME", "RELATIONSHIP");
    for person in &people {
        println!(
            "{:<36}  {:<24}  {:<16}  {}",
            person.id,
            person.name,
            person.relationship.as_deref().unwrap_or("-"),
            format_time(person.last_recognized),
        );
    }
    println!("{} enrolled", people.len());
    Ok(())
}

pub async fn show(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let person = store.get(id).await?;
    print_person(&person);
    Ok(())
}

pub async fn remove(config: &Config, id: &str, assume_yes: bool) -> Result<()> {
    let store = open_store(config).await?;
    let person = store.get(id).await?;
    if !confirm(&format!("Remove {} ({})?", person.name, person.id), assume_yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    recall_core::remove_person(store.as_ref(), &GalleryCache::new(), id).await?;
    println!("Removed {}", person.name);
    Ok(())
}

pub async fn clear(config: &Config, assume_yes: bool) -> Result<()> {
    let store = open_store(config).await?;
    let count = store.count().await?;
    if count == 0 {
        println!("No people enrolled.");
        return Ok(());
    }
    if !confirm(&format!("Remove all {count} enrolled people?"), assume_yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    let removed = recall_core::clear_people(store.as_ref(), &GalleryCache::new()).await?;
    println!("Removed {removed} people");
    Ok(())
}

pub async fn export(config: &Config, path: &Path) -> Result<()> {
    let store = open_store(config).await?;
    let count = recall_store::export_to(store.as_ref(), path).await?;
    println!("Exported {count} people to {}", path.display());
    Ok(())
}

pub async fn import(config: &Config, path: &Path, replace: bool, assume_yes: bool) -> Result<()> {
    let store = open_store(config).await?;
    if replace {
        let count = store.count().await?;
        if count > 0
            && !confirm(
                &format!("Replace all {count} enrolled people with {}?", path.display()),
                assume_yes,
            )?
        {
            println!("Cancelled.");
            return Ok(());
        }
    }
    let imported = recall_store::import_from(store.as_ref(), path, replace).await?;
    println!("Imported {} people from {}", imported.len(), path.display());
    Ok(())
}

pub fn devices() -> Result<()> {
    let devices = recall_hw::list_devices();
    if devices.is_empty() {
        println!("No camera found.");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}  {} (driver: {}, bus: {})",
            device.path, device.name, device.driver, device.bus
        );
    }
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    println!("config:      {}", Config::config_path().display());
    println!("database:    {}", config.db_path.display());
    println!(
        "encryption:  {}",
        if config.encrypt_embeddings {
            format!("on (key {})", config.key_path.display())
        } else {
            "off".to_string()
        }
    );
    println!("threshold:   {}", config.match_threshold);
    println!("announce:    {} via {}", config.announce, config.speech_command);

    match open_store(config).await {
        Ok(store) => match store.count().await {
            Ok(count) => println!("people:      {count}"),
            Err(e) => println!("people:      unavailable ({e})"),
        },
        Err(e) => println!("people:      unavailable ({e:#})"),
    }

    for path in [config.scrfd_model_path(), config.arcface_model_path()] {
        let present = if path.exists() { "present" } else { "MISSING" };
        println!("model:       {} ({present})", path.display());
    }
    match start_extractor(config).await {
        Ok(_) => println!("engine:      ready"),
        Err(e) => println!("engine:      not ready ({e:#})"),
    }

    let devices = recall_hw::list_devices();
    let camera = match &config.camera_device {
        Some(device) => device.clone(),
        None => devices
            .first()
            .map(|d| d.path.clone())
            .unwrap_or_else(|| "none found".to_string()),
    };
    println!("camera:      {camera} ({} capture devices)", devices.len());
    Ok(())
}

fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        bail!("{prompt} Refusing without a terminal; pass --yes to confirm");
    }

    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_photos(photos: &[PhotoEntry]) {
    for photo in photos {
        let status = match &photo.status {
            PhotoStatus::Valid => "ok".to_string(),
            PhotoStatus::Invalid(reason) => format!("rejected: {reason}"),
            PhotoStatus::Pending => "not checked".to_string(),
            PhotoStatus::Stored => "stored".to_string(),
        };
        println!("  {}  {status}", photo.path);
    }
}

fn print_person(person: &Person) {
    println!("id:            {}", person.id);
    println!("name:          {}", person.name);
    println!("relationship:  {}", person.relationship.as_deref().unwrap_or("-"));
    println!("notes:         {}", person.notes.as_deref().unwrap_or("-"));
    println!("enrolled:      {}", format_time(Some(person.created_at)));
    println!("last seen:     {}", format_time(person.last_recognized));
    println!(
        "descriptor:    {} values{}",
        person.reference_embedding.dim(),
        person
            .reference_embedding
            .model_version
            .as_deref()
            .map(|v| format!(" ({v})"))
            .unwrap_or_default()
    );
    println!("photos:");
    for image in &person.images {
        println!("  {image}");
    }
}

fn summary(result: &RecognitionResult) -> String {
    match (&result.person, &result.reason) {
        (Some(person), _) => format!("Recognized {}", person.name),
        (None, Some(reason)) => format!("Not recognized: {reason}"),
        (None, None) => "Not recognized".to_string(),
    }
}

fn print_result(result: &RecognitionResult) {
    let distance = result
        .distance
        .map(|d| format!(" (distance {d:.3})"))
        .unwrap_or_default();
    match &result.person {
        Some(person) => {
            let relationship = person
                .relationship
                .as_deref()
                .map(|r| format!(", your {r}"))
                .unwrap_or_default();
            println!("Recognized {}{relationship}{distance}", person.name);
            if let Some(notes) = &person.notes {
                println!("  {notes}");
            }
        }
        None => println!("{}{distance}", summary(result)),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn announce(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_change_only_notifier_skips_repeats() {
        let notifier = ChangeOnlyNotifier::new(Recorder::default());
        for text in ["This is Alice.", "This is Alice.", "This is Bob.", "This is Alice."] {
            notifier.announce(text).await;
        }
        assert_eq!(
            *notifier.inner.spoken.lock().unwrap(),
            vec!["This is Alice.", "This is Bob.", "This is Alice."]
        );
    }

    #[tokio::test]
    async fn test_models_not_loaded_is_not_ready() {
        let err = ModelsNotLoaded.detect(RgbImage::new(1, 1)).await.unwrap_err();
        assert!(matches!(err, recall_core::Error::NotReady(_)));
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_confirm_assume_yes() {
        assert!(confirm("Remove everything?", true).unwrap());
    }

    #[test]
    fn test_format_time_never() {
        assert_eq!(format_time(None), "never");
    }

    #[test]
    fn test_summary_lines() {
        let result = RecognitionResult {
            recognized: false,
            person: None,
            distance: None,
            bbox: None,
            reason: Some(recall_core::NotRecognizedReason::NoFaceDetected),
            timestamp: Utc::now(),
        };
        assert_eq!(summary(&result), "Not recognized: no face detected");
    }
}
