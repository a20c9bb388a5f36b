use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sp_cache::{CacheManager, CacheStats, sha256_hex};
use sp_formula::FormulaSet;
use sp_io::RecordSource;
use sp_session::{PlotSpecManager, SessionError, SessionMetadata, Workspace};
use sp_shift::{AnnotatedTable, PlotSpec, ShiftConfig, annotate};
use sp_types::DataTypeClass;
use tracing::{debug, info, warn};

use crate::{AnalysisConfig, AnalysisError};

/// Digest of every input an annotated table depends on. Persisted cache
/// artifacts are only reused when it matches.
#[must_use]
pub fn session_fingerprint(
    metadata: &SessionMetadata,
    formula_text: &str,
    plots: &PlotSpecManager,
    shift: &ShiftConfig,
) -> String {
    let specs = plots.specs().collect::<Vec<_>>();
    let material = format!(
        "engine={}\nbuild={}\nrecords={:?}\nshift={shift:?}\nplots={specs:?}\nformulas=\n{formula_text}",
        metadata.engine_number(),
        metadata.build_number(),
        metadata.selected_ids(),
    );
    sha256_hex(material.as_bytes())
}

/// The analysis pipeline for one session: fetch, evaluate formulas, detect
/// shifts, cache per class.
///
/// Every mutation goes through the analyzer so the workspace files and the
/// cache stay consistent with each other.
pub struct Analyzer<S> {
    source: S,
    config: AnalysisConfig,
    workspace: Workspace,
    metadata: SessionMetadata,
    formula_text: String,
    formulas: FormulaSet,
    plots: PlotSpecManager,
    cache: CacheManager<AnnotatedTable>,
}

impl<S> std::fmt::Debug for Analyzer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("engine", &self.metadata.engine_number())
            .field("build", &self.metadata.build_number())
            .field("formulas", &self.formulas.len())
            .field("plots", &self.plots.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<S: RecordSource> Analyzer<S> {
    /// Resumes the session saved in the configured workspace.
    pub fn open(source: S, config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        let workspace = Workspace::new(config.workspace.clone());
        let metadata = workspace.load_metadata()?;
        let formula_text = workspace.formula_store().load_text()?;
        let plots = workspace.load_plot_specs()?;
        Self::assemble(source, config, workspace, metadata, formula_text, plots)
    }

    /// Starts a session from the given state, overwriting whatever the
    /// workspace held.
    pub fn create(
        source: S,
        config: AnalysisConfig,
        metadata: SessionMetadata,
        formula_text: &str,
        plots: PlotSpecManager,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        let workspace = Workspace::new(config.workspace.clone());
        workspace.formula_store().commit(formula_text)?;
        workspace.save_metadata(&metadata)?;
        workspace.save_plot_specs(&plots)?;
        Self::assemble(
            source,
            config,
            workspace,
            metadata,
            formula_text.to_owned(),
            plots,
        )
    }

    fn assemble(
        source: S,
        config: AnalysisConfig,
        workspace: Workspace,
        metadata: SessionMetadata,
        formula_text: String,
        plots: PlotSpecManager,
    ) -> Result<Self, AnalysisError> {
        let formulas = FormulaSet::parse(&formula_text)?;
        let fingerprint = session_fingerprint(&metadata, &formula_text, &plots, &config.shift);
        let cache = CacheManager::new(
            config.cache.open_store(&config.workspace.dir),
            config.cache.clone(),
            fingerprint,
        );
        info!(
            engine = metadata.engine_number(),
            build = metadata.build_number(),
            records = metadata.records().len(),
            formulas = formulas.len(),
            plots = plots.len(),
            "session opened"
        );
        Ok(Self {
            source,
            config,
            workspace,
            metadata,
            formula_text,
            formulas,
            plots,
            cache,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn formula_text(&self) -> &str {
        &self.formula_text
    }

    #[must_use]
    pub fn formulas(&self) -> &FormulaSet {
        &self.formulas
    }

    #[must_use]
    pub fn plots(&self) -> &PlotSpecManager {
        &self.plots
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn is_cached(&self, class: DataTypeClass) -> bool {
        self.cache.is_cached(class)
    }

    /// The annotated table for `class`, from cache when possible.
    pub fn annotated(&mut self, class: DataTypeClass) -> Result<Arc<AnnotatedTable>, AnalysisError> {
        let Self {
            source,
            config,
            metadata,
            formulas,
            plots,
            cache,
            ..
        } = self;
        cache.get(class, || {
            compute(source, metadata, formulas, plots, &config.shift, class)
        })
    }

    /// Annotated tables for every class some plot draws. One class failing
    /// does not affect the others.
    pub fn refresh(
        &mut self,
    ) -> BTreeMap<DataTypeClass, Result<Arc<AnnotatedTable>, AnalysisError>> {
        let mut out = BTreeMap::new();
        for class in self.plots.classes() {
            let result = self.annotated(class);
            if let Err(err) = &result {
                warn!(%class, error = %err, "analysis failed");
            }
            out.insert(class, result);
        }
        out
    }

    /// Drops every cached result; the next request recomputes.
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Validates and stores new formula text. Rejected text changes nothing.
    pub fn commit_formulas(&mut self, text: &str) -> Result<(), AnalysisError> {
        self.formulas = self.workspace.formula_store().commit(text)?;
        self.formula_text = text.to_owned();
        self.refingerprint();
        Ok(())
    }

    /// Applies `edit` to the session metadata and saves it. An edit that
    /// fails leaves the saved state untouched.
    pub fn update_metadata<R, F>(&mut self, edit: F) -> Result<R, AnalysisError>
    where
        F: FnOnce(&mut SessionMetadata) -> Result<R, SessionError>,
    {
        let mut next = self.metadata.clone();
        let out = edit(&mut next)?;
        self.workspace.save_metadata(&next)?;
        self.metadata = next;
        self.refingerprint();
        Ok(out)
    }

    /// Switches engine/build, clearing the record list when either changes.
    pub fn set_identity(&mut self, engine: &str, build: &str) -> Result<bool, AnalysisError> {
        self.update_metadata(|metadata| metadata.set_identity(engine, build))
    }

    /// Applies `edit` to the plot specs and saves them.
    pub fn update_plots<R, F>(&mut self, edit: F) -> Result<R, AnalysisError>
    where
        F: FnOnce(&mut PlotSpecManager) -> Result<R, SessionError>,
    {
        let mut next = self.plots.clone();
        let out = edit(&mut next)?;
        self.workspace.save_plot_specs(&next)?;
        self.plots = next;
        self.refingerprint();
        Ok(out)
    }

    pub fn export_archive(&self, dest: &Path) -> Result<(), AnalysisError> {
        Ok(self.workspace.export_archive(dest)?)
    }

    /// Replaces the session with an archive's contents. Local comments are
    /// kept and every cached result is dropped.
    pub fn import_archive(&mut self, src: &Path) -> Result<(), AnalysisError> {
        self.workspace.import_archive(src)?;
        self.metadata = self.workspace.load_metadata()?;
        self.formula_text = self.workspace.formula_store().load_text()?;
        self.formulas = FormulaSet::parse(&self.formula_text)?;
        self.plots = self.workspace.load_plot_specs()?;
        if !self.refingerprint() {
            self.cache.invalidate();
        }
        Ok(())
    }

    fn refingerprint(&mut self) -> bool {
        let fingerprint = session_fingerprint(
            &self.metadata,
            &self.formula_text,
            &self.plots,
            &self.config.shift,
        );
        let changed = self.cache.set_fingerprint(fingerprint);
        debug!(changed, "session fingerprint refreshed");
        changed
    }
}

fn compute<S: RecordSource>(
    source: &S,
    metadata: &SessionMetadata,
    formulas: &FormulaSet,
    plots: &PlotSpecManager,
    shift: &ShiftConfig,
    class: DataTypeClass,
) -> Result<AnnotatedTable, AnalysisError> {
    let ids = metadata.selected_ids();
    if ids.is_empty() {
        return Err(AnalysisError::MissingData(format!(
            "no records selected for engine {}, build {}",
            metadata.engine_number(),
            metadata.build_number()
        )));
    }

    let table = source.fetch_table(metadata.engine_number(), metadata.build_number(), &ids, class)?;
    if table.is_empty() {
        return Err(AnalysisError::MissingData(format!(
            "none of the {} selected records has {class} data",
            ids.len()
        )));
    }

    let specs = plots
        .specs()
        .filter(|spec| spec.class == class)
        .cloned()
        .collect::<Vec<PlotSpec>>();
    let mut targets: Vec<String> = Vec::new();
    for name in specs.iter().flat_map(PlotSpec::parameters) {
        if !targets.contains(&name) {
            targets.push(name);
        }
    }

    let evaluated = formulas.evaluate_for(&table, &targets)?;
    let annotated = annotate(evaluated, &specs, shift)?;
    debug!(
        %class,
        rows = annotated.table.len(),
        pairs = annotated.annotations.len(),
        shifts = annotated.shift_count(),
        "class analysed"
    );
    Ok(annotated)
}
