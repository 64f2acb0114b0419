//! Depth-first traversal of one root across directories and nested zips.

use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use jwalk::{DirEntryIter, Parallelism, WalkDir};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::ZipArchive;

use tally_core::{
    CatalogConfig, CatalogError, CatalogUnit, ContainerKind, ContainerNode, ErrorKind,
    ErrorRecord, FileRecord, Operation, RecordOrigin,
};

use crate::budget::{ArchiveAllowance, ArchiveBudget};
use crate::hasher::{HashError, StreamHasher};
use crate::stager::{ArchiveStager, StageError, StagedEntry};

type Archive = ZipArchive<BufReader<File>>;

/// State shared by every traversal of one run.
#[derive(Debug)]
pub struct TraverseContext {
    config: CatalogConfig,
    hasher: StreamHasher,
    stager: ArchiveStager,
    budget: Arc<ArchiveBudget>,
    serial_walk: bool,
    cancel: CancellationToken,
}

impl TraverseContext {
    /// Build the context for a run.
    pub fn new(config: &CatalogConfig, cancel: CancellationToken) -> Self {
        Self {
            config: config.clone(),
            hasher: StreamHasher::new(config.hash_algorithm).with_cancellation(cancel.clone()),
            stager: ArchiveStager::new(config.staging_dir.clone())
                .with_cancellation(cancel.clone()),
            budget: Arc::new(ArchiveBudget::new(config.archive_entry_budget)),
            serial_walk: false,
            cancel,
        }
    }

    /// Walk directories on the calling thread instead of rayon's pool.
    pub fn with_serial_walk(mut self, serial: bool) -> Self {
        self.serial_walk = serial;
        self
    }

    /// Budget shared by every archive chain in the run.
    pub fn budget(&self) -> &ArchiveBudget {
        &self.budget
    }

    /// Token checked before every traversal step.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn walk_parallelism(&self) -> Parallelism {
        if self.serial_walk {
            Parallelism::Serial
        } else {
            Parallelism::RayonDefaultPool {
                busy_timeout: Duration::from_millis(100),
            }
        }
    }

    /// Hash a file on disk into a unit.
    fn hash_path(
        &self,
        path: &Path,
        provenance: Vec<CompactString>,
    ) -> Result<CatalogUnit, CatalogError> {
        let unit = match self.hasher.hash_file(path) {
            Err(e) => CatalogUnit::Error(ErrorRecord::read(path, Operation::Open, &e)),
            Ok(Ok(digest)) => CatalogUnit::File(FileRecord::new(
                path,
                digest.bytes,
                digest.hex,
                self.hasher.algorithm(),
                provenance,
                RecordOrigin::Filesystem,
            )),
            Ok(Err(HashError::Read { source, .. })) => {
                CatalogUnit::Error(ErrorRecord::read(path, Operation::Read, &source))
            }
            Ok(Err(HashError::Cancelled)) => return Err(CatalogError::Cancelled),
        };
        Ok(unit)
    }

    /// Open an archive that lives on the filesystem.
    ///
    /// `parent` is the provenance of the directory holding it.
    fn open_archive_path(
        &self,
        path: &Path,
        parent: &[CompactString],
    ) -> Result<Opened, CatalogError> {
        let mut units = Vec::new();
        if self.config.catalog_archive_files {
            units.push(self.hash_path(path, parent.to_vec())?);
        }

        let archive = match File::open(path) {
            Ok(file) => ZipArchive::new(BufReader::new(file)),
            Err(e) => {
                units.push(CatalogUnit::Error(ErrorRecord::read(path, Operation::Open, &e)));
                return Ok(Opened { units, frame: None });
            }
        };
        let archive = match archive {
            Ok(archive) => archive,
            Err(e) => {
                units.push(CatalogUnit::Error(ErrorRecord::archive_open(path, e)));
                return Ok(Opened { units, frame: None });
            }
        };

        let mut provenance = parent.to_vec();
        provenance.push(display_name(path));
        let frame = ArchiveFrame::open(
            archive,
            path.to_path_buf(),
            provenance,
            self.budget.open_chain(),
            None,
            &mut units,
        );
        Ok(Opened { units, frame })
    }
}

/// Units produced while opening a container, plus the frame to descend into.
struct Opened {
    units: Vec<CatalogUnit>,
    frame: Option<Frame>,
}

/// Outcome of one frame step.
struct Advance {
    units: Vec<CatalogUnit>,
    child: Option<Frame>,
    finished: bool,
}

impl Advance {
    fn unit(unit: CatalogUnit) -> Self {
        Self {
            units: vec![unit],
            child: None,
            finished: false,
        }
    }

    fn finished(units: Vec<CatalogUnit>) -> Self {
        Self {
            units,
            child: None,
            finished: true,
        }
    }

    fn opened(opened: Opened) -> Self {
        Self {
            units: opened.units,
            child: opened.frame,
            finished: false,
        }
    }

    fn nothing() -> Self {
        Self {
            units: Vec::new(),
            child: None,
            finished: false,
        }
    }
}

enum Frame {
    Walk(WalkFrame),
    Archive(Box<ArchiveFrame>),
}

impl Frame {
    fn advance(&mut self, ctx: &TraverseContext) -> Result<Advance, CatalogError> {
        match self {
            Frame::Walk(frame) => frame.advance(ctx),
            Frame::Archive(frame) => frame.advance(ctx),
        }
    }
}

/// A directory tree walked with jwalk.
struct WalkFrame {
    entries: DirEntryIter<((), ())>,
    root: PathBuf,
    root_name: CompactString,
}

impl WalkFrame {
    fn new(ctx: &TraverseContext, root: &Path) -> Self {
        let entries = WalkDir::new(root)
            .parallelism(ctx.walk_parallelism())
            .sort(true)
            .skip_hidden(false)
            .follow_links(false)
            .min_depth(0)
            .into_iter();

        Self {
            entries,
            root: root.to_path_buf(),
            root_name: display_name(root),
        }
    }

    /// Root name followed by the components of `relative`.
    fn provenance(&self, relative: Option<&Path>) -> Vec<CompactString> {
        let mut provenance = vec![self.root_name.clone()];
        if let Some(relative) = relative {
            provenance.extend(
                relative
                    .components()
                    .map(|c| CompactString::new(c.as_os_str().to_string_lossy())),
            );
        }
        provenance
    }

    fn advance(&mut self, ctx: &TraverseContext) -> Result<Advance, CatalogError> {
        let entry = match self.entries.next() {
            None => return Ok(Advance::finished(Vec::new())),
            Some(Err(err)) => {
                return Ok(Advance::unit(CatalogUnit::Error(walk_error(&err, &self.root))));
            }
            Some(Ok(entry)) => entry,
        };

        let path = entry.path();
        let relative = path.strip_prefix(&self.root).ok().filter(|r| !r.as_os_str().is_empty());
        let file_type = entry.file_type();

        // jwalk descends into a linked root even with links unfollowed.
        let linked_root = entry.depth == 0 && file_type.is_symlink() && path.is_dir();

        if file_type.is_dir() || linked_root {
            let provenance = self.provenance(relative);
            let units = directory_units(path, provenance, entry.read_children_error.as_ref());
            return Ok(Advance {
                units,
                child: None,
                finished: false,
            });
        }

        let parent = self.provenance(relative.and_then(Path::parent));

        if file_type.is_symlink() {
            // Links are hashed through when they point at a file and never
            // followed into directories.
            return match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => Ok(Advance::unit(ctx.hash_path(&path, parent)?)),
                Ok(_) => {
                    debug!(path = %path.display(), "skipping link to non-file");
                    Ok(Advance::nothing())
                }
                Err(e) => Ok(Advance::unit(CatalogUnit::Error(ErrorRecord::read(
                    &path,
                    Operation::Open,
                    &e,
                )))),
            };
        }

        if !file_type.is_file() {
            debug!(path = %path.display(), "skipping special file");
            return Ok(Advance::nothing());
        }

        if ctx.config.is_archive_path(&path) {
            return ctx.open_archive_path(&path, &parent).map(Advance::opened);
        }
        Ok(Advance::unit(ctx.hash_path(&path, parent)?))
    }
}

/// Convert a jwalk failure into a record, falling back to `root` when it
/// carries no path.
fn walk_error(err: &jwalk::Error, root: &Path) -> ErrorRecord {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    match err.io_error() {
        Some(io) => ErrorRecord::read(path, Operation::Open, io),
        None => ErrorRecord::new(path, Operation::Open, ErrorKind::ReadError, err.to_string()),
    }
}

/// Container unit for a directory, followed by an error when its children
/// could not be listed.
///
/// An unlistable directory is never reported as empty.
fn directory_units(
    path: PathBuf,
    provenance: Vec<CompactString>,
    children_error: Option<&jwalk::Error>,
) -> Vec<CatalogUnit> {
    let listing = match children_error {
        Some(err) => Err(walk_error(err, &path)),
        None => fs::read_dir(&path)
            .map(|mut children| children.next().is_none())
            .map_err(|e| ErrorRecord::read(&path, Operation::Open, &e)),
    };
    let (empty, error) = match listing {
        Ok(empty) => (empty, None),
        Err(record) => (false, Some(record)),
    };
    debug!(path = %path.display(), empty, unreadable = error.is_some(), "directory");

    let mut units = vec![CatalogUnit::Container(ContainerNode::new(
        ContainerKind::Directory,
        path,
        provenance,
        empty,
    ))];
    units.extend(error.map(CatalogUnit::Error));
    units
}

/// One entry of an archive's central directory.
struct EntryMeta {
    index: usize,
    name: String,
    is_dir: bool,
}

/// A zip archive being expanded, from disk or staged.
struct ArchiveFrame {
    archive: Archive,
    entries: Vec<EntryMeta>,
    cursor: usize,
    occupied: HashSet<String>,
    path: PathBuf,
    provenance: Vec<CompactString>,
    allowance: Arc<ArchiveAllowance>,
    // Keeps the staged copy on disk until the frame is dropped.
    _staged: Option<StagedEntry>,
}

impl ArchiveFrame {
    /// Index an opened archive and emit its container unit into `units`.
    ///
    /// Returns `None` when there is nothing to descend into.
    fn open(
        mut archive: Archive,
        path: PathBuf,
        provenance: Vec<CompactString>,
        allowance: Arc<ArchiveAllowance>,
        staged: Option<StagedEntry>,
        units: &mut Vec<CatalogUnit>,
    ) -> Option<Frame> {
        let mut entries = Vec::with_capacity(archive.len());
        let mut unreadable = Vec::new();
        for index in 0..archive.len() {
            match archive.by_index_raw(index) {
                Ok(file) => {
                    let name = file.name().replace('\\', "/");
                    let is_dir = name.ends_with('/');
                    entries.push(EntryMeta {
                        index,
                        name,
                        is_dir,
                    });
                }
                Err(e) => unreadable.push(ErrorRecord::new(
                    path.join(format!("#{index}")),
                    Operation::Open,
                    ErrorKind::ReadError,
                    e.to_string(),
                )),
            }
        }
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let mut occupied = HashSet::new();
        for entry in &entries {
            let trimmed = entry.name.trim_end_matches('/');
            for (pos, _) in trimmed.match_indices('/') {
                occupied.insert(trimmed[..=pos].to_string());
            }
        }

        let empty = entries.is_empty() && unreadable.is_empty();
        debug!(path = %path.display(), entries = entries.len(), "archive");
        units.push(CatalogUnit::Container(ContainerNode::new(
            ContainerKind::Archive,
            &path,
            provenance.clone(),
            empty,
        )));
        units.extend(unreadable.into_iter().map(CatalogUnit::Error));

        if entries.is_empty() {
            return None;
        }
        Some(Frame::Archive(Box::new(Self {
            archive,
            entries,
            cursor: 0,
            occupied,
            path,
            provenance,
            allowance,
            _staged: staged,
        })))
    }

    fn advance(&mut self, ctx: &TraverseContext) -> Result<Advance, CatalogError> {
        let Some(entry) = self.entries.get(self.cursor) else {
            return Ok(Advance::finished(Vec::new()));
        };
        self.cursor += 1;

        if let Err(exceeded) = ctx.stager.admit(&self.allowance) {
            debug!(path = %self.path.display(), cap = exceeded.cap, "archive budget exhausted");
            return Ok(Advance::finished(vec![CatalogUnit::Error(
                ErrorRecord::budget_exceeded(&self.path, exceeded.cap),
            )]));
        }

        let segments: Vec<&str> = entry
            .name
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        let mut display = self.path.clone();
        display.extend(&segments);
        let parents = segments.len().saturating_sub(1);
        let mut provenance = self.provenance.clone();
        provenance.extend(segments[..parents].iter().map(|s| CompactString::new(*s)));

        if entry.is_dir {
            if let Some(last) = segments.last() {
                provenance.push(CompactString::new(*last));
            }
            let empty = !self.occupied.contains(&entry.name);
            return Ok(Advance::unit(CatalogUnit::Container(ContainerNode::new(
                ContainerKind::Directory,
                display,
                provenance,
                empty,
            ))));
        }

        let index = entry.index;
        if ctx.config.is_archive_name(&entry.name) {
            let name = entry.name.clone();
            return self.descend(ctx, index, &name, display, provenance);
        }

        let file = match self.archive.by_index(index) {
            Ok(file) => file,
            Err(e) => {
                return Ok(Advance::unit(CatalogUnit::Error(ErrorRecord::new(
                    display,
                    Operation::Extract,
                    ErrorKind::ReadError,
                    e.to_string(),
                ))));
            }
        };
        let unit = match ctx.hasher.hash_reader(file) {
            Ok(digest) => CatalogUnit::File(FileRecord::new(
                display,
                digest.bytes,
                digest.hex,
                ctx.hasher.algorithm(),
                provenance,
                RecordOrigin::Archive,
            )),
            Err(HashError::Read { source, .. }) => {
                CatalogUnit::Error(ErrorRecord::read(display, Operation::Read, &source))
            }
            Err(HashError::Cancelled) => return Err(CatalogError::Cancelled),
        };
        Ok(Advance::unit(unit))
    }

    /// Stage a nested archive and open it as a child frame.
    fn descend(
        &mut self,
        ctx: &TraverseContext,
        index: usize,
        name: &str,
        display: PathBuf,
        parent: Vec<CompactString>,
    ) -> Result<Advance, CatalogError> {
        let staged = {
            let file = match self.archive.by_index(index) {
                Ok(file) => file,
                Err(e) => {
                    return Ok(Advance::unit(CatalogUnit::Error(ErrorRecord::new(
                        display,
                        Operation::Extract,
                        ErrorKind::ReadError,
                        e.to_string(),
                    ))));
                }
            };
            match ctx.stager.stage(file, name) {
                Ok(staged) => staged,
                Err(StageError::Read(e)) => {
                    return Ok(Advance::unit(CatalogUnit::Error(ErrorRecord::read(
                        display,
                        Operation::Extract,
                        &e,
                    ))));
                }
                Err(StageError::Storage { path, source }) => {
                    return Err(CatalogError::staging(path, source));
                }
                Err(StageError::Cancelled) => return Err(CatalogError::Cancelled),
            }
        };

        let mut units = Vec::new();
        if ctx.config.catalog_archive_files {
            let unit = match staged.open().map(|f| ctx.hasher.hash_reader(f)) {
                Ok(Ok(digest)) => CatalogUnit::File(FileRecord::new(
                    &display,
                    digest.bytes,
                    digest.hex,
                    ctx.hasher.algorithm(),
                    parent.clone(),
                    RecordOrigin::Archive,
                )),
                Ok(Err(HashError::Read { source, .. })) => {
                    CatalogUnit::Error(ErrorRecord::read(&display, Operation::Read, &source))
                }
                Ok(Err(HashError::Cancelled)) => return Err(CatalogError::Cancelled),
                Err(e) => CatalogUnit::Error(ErrorRecord::read(&display, Operation::Open, &e)),
            };
            units.push(unit);
        }

        let archive = match staged.open() {
            Ok(file) => ZipArchive::new(BufReader::new(file)),
            Err(e) => {
                units.push(CatalogUnit::Error(ErrorRecord::read(
                    &display,
                    Operation::Open,
                    &e,
                )));
                return Ok(Advance::opened(Opened { units, frame: None }));
            }
        };
        let archive = match archive {
            Ok(archive) => archive,
            Err(e) => {
                units.push(CatalogUnit::Error(ErrorRecord::archive_open(&display, e)));
                return Ok(Advance::opened(Opened { units, frame: None }));
            }
        };

        let mut provenance = parent;
        provenance.push(display_name(&display));
        let frame = ArchiveFrame::open(
            archive,
            display,
            provenance,
            Arc::clone(&self.allowance),
            Some(staged),
            &mut units,
        );
        Ok(Advance::opened(Opened { units, frame }))
    }
}

/// Lazy depth-first iterator over the units of one root.
///
/// Yields `Err` at most once, for failures that end the run; the iterator
/// is fused afterwards. Dropping it removes every staged file it created.
pub struct Traverser<'a> {
    ctx: &'a TraverseContext,
    root: PathBuf,
    started: bool,
    done: bool,
    pending: VecDeque<CatalogUnit>,
    stack: Vec<Frame>,
}

impl<'a> Traverser<'a> {
    /// Create a traversal of `root`. Nothing is read until iteration starts.
    pub fn new(ctx: &'a TraverseContext, root: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            root: root.into(),
            started: false,
            done: false,
            pending: VecDeque::new(),
            stack: Vec::new(),
        }
    }

    /// Root this traversal walks.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn start(&mut self) -> Result<(), CatalogError> {
        let root = self.root.clone();
        let metadata = match fs::metadata(&root) {
            Ok(metadata) => metadata,
            Err(e) => {
                self.pending
                    .push_back(CatalogUnit::Error(ErrorRecord::read(&root, Operation::Open, &e)));
                return Ok(());
            }
        };

        if metadata.is_dir() {
            self.stack.push(Frame::Walk(WalkFrame::new(self.ctx, &root)));
        } else if metadata.is_file() {
            if self.ctx.config.is_archive_path(&root) {
                let opened = self.ctx.open_archive_path(&root, &[])?;
                self.pending.extend(opened.units);
                self.stack.extend(opened.frame);
            } else {
                self.pending.push_back(self.ctx.hash_path(&root, Vec::new())?);
            }
        } else {
            debug!(path = %root.display(), "skipping root that is neither file nor directory");
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.done = true;
        self.pending.clear();
        self.stack.clear();
    }
}

impl Iterator for Traverser<'_> {
    type Item = Result<CatalogUnit, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.ctx.cancel.is_cancelled() {
                self.abort();
                return Some(Err(CatalogError::Cancelled));
            }
            if let Some(unit) = self.pending.pop_front() {
                return Some(Ok(unit));
            }

            let step = if !self.started {
                self.started = true;
                self.start().map(|()| None)
            } else {
                match self.stack.last_mut() {
                    Some(frame) => frame.advance(self.ctx).map(Some),
                    None => {
                        self.done = true;
                        return None;
                    }
                }
            };

            match step {
                Ok(Some(advance)) => {
                    self.pending.extend(advance.units);
                    if advance.finished {
                        self.stack.pop();
                    }
                    self.stack.extend(advance.child);
                }
                Ok(None) => {}
                Err(e) => {
                    self.abort();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for Traverser<'_> {}

/// Last component of `path`, or the whole path when it has none.
fn display_name(path: &Path) -> CompactString {
    match path.file_name() {
        Some(name) => CompactString::new(name.to_string_lossy()),
        None => fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|n| CompactString::new(n.to_string_lossy())))
            .unwrap_or_else(|| CompactString::new(path.to_string_lossy())),
    }
}
