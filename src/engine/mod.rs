//! Reconciliation engine: resolves each image's fragment set to a target
//! row and keeps target rows in sync with the images pointing at them.
//!
//! Every public operation is one transactional unit per image. A batch
//! ingestion commits image by image, so a failure partway through leaves
//! the earlier images fully processed and the failing one untouched.

mod dispatch;

use thiserror::Error;
use tracing::info;

use crate::models::{DetectionRun, ImageInput, ImageRecord, Polygon};
use crate::repository::{images, runs, Database, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Re-submitting a known image name is unsupported, never a silent
    /// update.
    #[error("image {name:?} was already ingested in run {run}")]
    ImageAlreadyKnown { run: i64, name: String },

    #[error("fragments reference {field:?}, which is not a field of {table}")]
    UnknownFieldReference { table: String, field: String },

    #[error("{count} fragment values observed for single-valued field {table}.{field}")]
    AmbiguousFieldValue {
        table: String,
        field: String,
        count: usize,
    },

    #[error("fragment value {value:?} for {table}.{field} is not a valid {ty}")]
    InvalidFragmentValue {
        table: String,
        field: String,
        value: String,
        ty: &'static str,
    },

    #[error("ingestion cancelled from the progress callback")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Which counter a progress callback invocation advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Image rows resolved so far.
    Images,
    /// Images whose fragment-insert phase completed so far.
    Fragments,
}

/// One detection run bound to its database.
pub struct Engine<'a> {
    db: &'a Database,
    run: DetectionRun,
}

impl<'a> Engine<'a> {
    pub fn new(db: &'a Database, run: DetectionRun) -> Self {
        Self { db, run }
    }

    /// Resolve raw scoping constraints to their (possibly pre-existing)
    /// run and bind an engine to it.
    pub fn create_or_get(
        db: &'a Database,
        raw: &[(String, Vec<(String, String)>)],
    ) -> Result<Self> {
        let conn = db.connect()?;
        let run = runs::create_or_get_run(&conn, db.config(), raw)?;
        Ok(Self { db, run })
    }

    pub fn run(&self) -> &DetectionRun {
        &self.run
    }

    /// Ingest a batch of images with their decoded fragments.
    ///
    /// Each image is one transaction: insert the image row, insert the
    /// fragments whose text the image does not already carry, then
    /// re-dispatch. `progress` is invoked synchronously with two
    /// monotonically increasing counters; returning `false` aborts the
    /// batch, rolling back the in-flight image only.
    pub fn update_images<F>(&self, inputs: &[ImageInput], mut progress: F) -> Result<Vec<ImageRecord>>
    where
        F: FnMut(ProgressPhase, usize) -> bool,
    {
        let mut conn = self.db.connect()?;
        let mut out = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let tx = conn.transaction().map_err(StoreError::from)?;
            if images::find_image(&tx, self.run.id, &input.name)?.is_some() {
                return Err(EngineError::ImageAlreadyKnown {
                    run: self.run.id,
                    name: input.name.clone(),
                });
            }
            let image = images::insert_image(&tx, self.run.id, &input.path, &input.name)?;
            if !progress(ProgressPhase::Images, i + 1) {
                return Err(EngineError::Cancelled);
            }

            // Deduplicated by decoded text, not by geometry.
            let mut known: std::collections::HashSet<String> =
                images::fragment_texts(&tx, image.id)?.into_iter().collect();
            for detection in &input.detections {
                if !known.insert(detection.text.clone()) {
                    continue;
                }
                images::insert_fragment(&tx, image.id, Some(&detection.text), &detection.bounds)?;
            }
            if !progress(ProgressPhase::Fragments, i + 1) {
                return Err(EngineError::Cancelled);
            }

            dispatch::dispatch_image(&tx, self.db.config(), &self.run, image.id)?;
            tx.commit().map_err(StoreError::from)?;
            out.push(image);
        }
        info!(run = self.run.id, images = out.len(), "ingested batch");
        Ok(out)
    }

    /// Re-run the dispatch state machine for one image.
    pub fn redispatch(&self, image_id: i64) -> Result<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        dispatch::dispatch_image(&tx, self.db.config(), &self.run, image_id)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    /// Flip the exclusion flag and re-dispatch; an ignored image's target
    /// is cleared and its former target resynced without it.
    pub fn set_ignored(&self, image_id: i64, ignored: bool) -> Result<()> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        images::set_image_ignored(&tx, image_id, ignored)?;
        dispatch::dispatch_image(&tx, self.db.config(), &self.run, image_id)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    /// Add one fragment by hand. `data` may be `None` for a box drawn but
    /// not yet read; such fragments never participate in matching.
    pub fn add_fragment(
        &self,
        image_id: i64,
        data: Option<&str>,
        bounds: &Polygon,
    ) -> Result<i64> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let id = images::insert_fragment(&tx, image_id, data, bounds)?;
        dispatch::dispatch_image(&tx, self.db.config(), &self.run, image_id)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(id)
    }

    /// Remove one fragment and re-dispatch its image. `Ok(false)` when the
    /// fragment does not exist.
    pub fn remove_fragment(&self, fragment_id: i64) -> Result<bool> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        let Some(image_id) = images::fragment_image(&tx, fragment_id)? else {
            return Ok(false);
        };
        images::remove_fragment(&tx, fragment_id)?;
        dispatch::dispatch_image(&tx, self.db.config(), &self.run, image_id)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(true)
    }
}
