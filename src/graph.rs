//! Host backed by a graph folder of Markdown pages.
//!
//! Pages live in `pages/*.md` and `journals/*.md`. Each top-level `- ` bullet
//! is a block; continuation lines are indented by two spaces and nested
//! bullets are carried along untouched. Text before the first bullet is the
//! page's pre-block.

use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::UNIX_EPOCH,
};

use async_trait::async_trait;
use log::{debug, error, info, trace};
use tempfile::NamedTempFile;
use tokio::sync::Mutex as TokioMutex;
use walkdir::WalkDir;

use crate::{
    Block, BlockId, FileId, FileLocator, Host, Page, PageId, Result, Settings, StampError,
};

/// Folders holding pages, relative to the graph root
pub const PAGE_DIRS: [&str; 2] = ["pages", "journals"];

const JOURNAL_DIR: &str = "journals";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FileBlock {
    /// Written without a bullet
    pre_block: bool,
    content: String,
    /// Bullet or indent stripped from each content line
    prefixes: Vec<String>,
    /// Nested bullets, kept verbatim
    children: String,
    /// Text as read from disk, children included; dropped once edited
    source: Option<String>,
}

impl FileBlock {
    fn edited(content: &str) -> Self {
        Self {
            content: content.to_string(),
            ..Self::default()
        }
    }

    /// Turns a pre-block into an ordinary bullet
    fn demote(&mut self) {
        self.pre_block = false;
        self.prefixes.clear();
        self.source = None;
    }

    fn set_content(&mut self, content: &str) {
        self.content = content.to_string();
        self.source = None;
    }

    /// Takes a line into the block's content, remembering what was stripped
    fn push_line(&mut self, line: &str, body: &str) {
        self.prefixes.push(line[..line.len() - body.len()].to_string());
        self.content.push_str(body);
        self.push_source(line);
    }

    fn push_source(&mut self, line: &str) {
        if let Some(source) = self.source.as_mut() {
            source.push_str(line);
        }
    }

    fn render(&self, out: &mut String) {
        if let Some(source) = &self.source {
            out.push_str(source);
            return;
        }

        for (n, line) in self.content.split_inclusive('\n').enumerate() {
            let prefix = match self.prefixes.get(n) {
                Some(prefix) => prefix.as_str(),
                None if self.pre_block => "",
                None if n == 0 => "- ",
                None if line.trim_end_matches(['\r', '\n']).is_empty() => "",
                None => "  ",
            };
            out.push_str(prefix);
            out.push_str(line);
        }
        if self.content.is_empty() && !self.pre_block {
            out.push('-');
        }

        if !self.children.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&self.children);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PageFile {
    /// Whitespace before the first block
    prelude: String,
    blocks: Vec<FileBlock>,
}

fn is_bullet(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

fn bullet_body(line: &str) -> &str {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix('-'))
        .unwrap_or(line)
}

fn parse_page(text: &str) -> PageFile {
    let mut page = PageFile::default();
    let mut pre = FileBlock {
        pre_block: true,
        source: Some(String::new()),
        ..FileBlock::default()
    };

    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\r', '\n']);

        if is_bullet(bare) {
            let mut block = FileBlock {
                source: Some(String::new()),
                ..FileBlock::default()
            };
            block.push_line(line, bullet_body(line));
            page.blocks.push(block);
            continue;
        }

        let Some(current) = page.blocks.last_mut() else {
            pre.push_line(line, line);
            continue;
        };

        if !current.children.is_empty() || is_bullet(bare.trim_start()) {
            current.children.push_str(line);
            current.push_source(line);
        } else {
            current.push_line(line, line.strip_prefix("  ").unwrap_or(line));
        }
    }

    if pre.content.trim().is_empty() {
        page.prelude = pre.content;
    } else {
        page.blocks.insert(0, pre);
    }
    page
}

fn render_page(page: &PageFile) -> String {
    let mut out = page.prelude.clone();
    for block in &page.blocks {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        block.render(&mut out);
    }
    out
}

/// Name of the page stored at `path`, with `___` decoded to `/`
fn page_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace("___", "/"))
        .unwrap_or_default()
}

fn block_id(page: &PageId, index: usize) -> BlockId {
    BlockId(format!("{}#{}", page, index))
}

fn split_block_id(id: &BlockId) -> Option<(PageId, usize)> {
    let (page, index) = id.0.rsplit_once('#')?;
    Some((PageId(page.to_string()), index.parse().ok()?))
}

#[derive(Default)]
struct FileIndex {
    by_path: HashMap<String, FileId>,
    by_id: HashMap<FileId, String>,
}

impl FileIndex {
    fn id_for(&mut self, relative: &str) -> FileId {
        if let Some(id) = self.by_path.get(relative) {
            return *id;
        }
        let id = self.by_id.len() as FileId + 1;
        self.by_path.insert(relative.to_string(), id);
        self.by_id.insert(id, relative.to_string());
        id
    }
}

/// A graph folder exposed through [`Host`].
pub struct GraphStore {
    root: PathBuf,
    date_format: String,
    language: String,
    files: Mutex<FileIndex>,
    /// Serializes read-modify-write cycles on page files
    write_lock: TokioMutex<()>,
}

impl GraphStore {
    /// Opens the graph at `root` and indexes its page files.
    pub fn open(root: impl Into<PathBuf>, settings: &Settings) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            error!("Graph directory does not exist: {}", root.display());
            return Err(StampError::DirectoryError { path: root });
        }

        let store = Self {
            root,
            date_format: settings.date_format.clone(),
            language: settings.language.clone(),
            files: Mutex::new(FileIndex::default()),
            write_lock: TokioMutex::new(()),
        };
        let count = store.scan();
        info!("Opened graph {} with {} pages", store.root.display(), count);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn files(&self) -> MutexGuard<'_, FileIndex> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers every page file, in path order so ids are stable across runs
    fn scan(&self) -> usize {
        let mut relative: Vec<String> = PAGE_DIRS
            .iter()
            .flat_map(|dir| {
                WalkDir::new(self.root.join(dir))
                    .min_depth(1)
                    .into_iter()
                    .filter_map(|e| e.ok())
            })
            .filter(|entry| {
                entry.path().is_file() && entry.path().extension().is_some_and(|ext| ext == "md")
            })
            .filter_map(|entry| self.page_id_for(entry.path()).map(|id| id.0))
            .collect();
        relative.sort();

        let mut files = self.files();
        for path in &relative {
            files.id_for(path);
        }
        relative.len()
    }

    /// Page id for a file inside the graph, `None` for anything else
    pub fn page_id_for(&self, path: &Path) -> Option<PageId> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let mut components = relative.components();
        let top = components.next()?.as_os_str().to_str()?;
        if !PAGE_DIRS.contains(&top) || relative.extension().is_none_or(|ext| ext != "md") {
            return None;
        }
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(PageId(parts.join("/")))
    }

    /// Looks a page up by name, case-insensitively
    pub fn find_page(&self, name: &str) -> Result<Page> {
        let wanted = name.trim().to_lowercase();
        self.scan();
        let candidates: Vec<String> = self.files().by_path.keys().cloned().collect();

        candidates
            .into_iter()
            .find(|relative| page_name(Path::new(relative)).to_lowercase() == wanted)
            .map(|relative| self.load_page(&PageId(relative)))
            .transpose()?
            .flatten()
            .ok_or_else(|| StampError::NotFound {
                what: format!("page {}", name),
            })
    }

    fn path_of(&self, page: &PageId) -> PathBuf {
        self.root.join(&page.0)
    }

    fn load_page(&self, id: &PageId) -> Result<Option<Page>> {
        let path = self.path_of(id);
        if !path.is_file() {
            return Ok(None);
        }

        let modified = fs::metadata(&path)?.modified()?;
        let updated_at = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Ok(Some(Page {
            id: id.clone(),
            name: page_name(&path),
            is_journal: id.0.starts_with(&format!("{}/", JOURNAL_DIR)),
            updated_at,
            file: Some(self.files().id_for(&id.0)),
        }))
    }

    fn read_page_file(&self, id: &PageId) -> Result<Option<PageFile>> {
        let path = self.path_of(id);
        if !path.is_file() {
            return Ok(None);
        }
        trace!("Reading page file {}", path.display());
        Ok(Some(parse_page(&fs::read_to_string(&path)?)))
    }

    /// Writes a page through a temporary file in the same directory
    fn write_page_file(&self, id: &PageId, page: &PageFile) -> Result<()> {
        let path = self.path_of(id);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let write = || -> std::io::Result<()> {
            let mut temp_file = NamedTempFile::new_in(dir)?;
            temp_file.write_all(render_page(page).as_bytes())?;
            temp_file.flush()?;
            temp_file.persist(&path).map_err(|e| e.error)?;
            Ok(())
        };

        write().map_err(|e| {
            error!("Failed to write page file {}: {}", path.display(), e);
            StampError::WriteFailure {
                target: id.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!("Wrote page file {}", path.display());
        Ok(())
    }

    fn to_blocks(id: &PageId, page: &PageFile) -> Vec<Block> {
        page.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| Block {
                id: block_id(id, index),
                content: block.content.clone(),
                page: id.clone(),
            })
            .collect()
    }

    fn locate(&self, id: &BlockId) -> Result<(PageId, usize, PageFile)> {
        let not_found = || StampError::NotFound {
            what: format!("block {}", id),
        };
        let (page, index) = split_block_id(id).ok_or_else(not_found)?;
        let file = self.read_page_file(&page)?.ok_or_else(not_found)?;
        if index >= file.blocks.len() {
            return Err(not_found());
        }
        Ok((page, index, file))
    }
}

#[async_trait]
impl FileLocator for GraphStore {
    async fn resolve_file_path(&self, file_id: FileId) -> Option<String> {
        self.files().by_id.get(&file_id).cloned()
    }
}

#[async_trait]
impl Host for GraphStore {
    async fn get_block(&self, id: &BlockId) -> Result<Option<Block>> {
        match self.locate(id) {
            Ok((page, index, file)) => Ok(Self::to_blocks(&page, &file).into_iter().nth(index)),
            Err(StampError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_page(&self, id: &PageId) -> Result<Option<Page>> {
        self.load_page(id)
    }

    async fn page_blocks(&self, page: &PageId) -> Result<Vec<Block>> {
        Ok(self
            .read_page_file(page)?
            .map(|file| Self::to_blocks(page, &file))
            .unwrap_or_default())
    }

    async fn update_block(&self, id: &BlockId, content: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let (page, index, mut file) = self.locate(id)?;
        file.blocks[index].set_content(content);
        self.write_page_file(&page, &file)
    }

    async fn insert_block_before(&self, anchor: &BlockId, content: &str) -> Result<BlockId> {
        let _guard = self.write_lock.lock().await;
        let (page, index, mut file) = self.locate(anchor)?;
        if file.blocks[index].pre_block {
            // a pre-block can only open the file, so it becomes a bullet
            file.blocks[index].demote();
        }
        file.blocks.insert(index, FileBlock::edited(content));
        self.write_page_file(&page, &file)?;
        Ok(block_id(&page, index))
    }

    async fn date_format(&self) -> String {
        self.date_format.clone()
    }

    async fn language(&self) -> String {
        self.language.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bullets_continuations_and_children() {
        let text = "- title:: Foo\n  tags:: a\n\t- child\n\t  more\n- second\n";
        let page = parse_page(text);
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].content, "title:: Foo\ntags:: a\n");
        assert_eq!(page.blocks[0].children, "\t- child\n\t  more\n");
        assert_eq!(page.blocks[1].content, "second\n");
        assert_eq!(render_page(&page), text);
    }

    #[test]
    fn leading_properties_form_a_pre_block() {
        let text = "title:: Foo\n\n- body\n";
        let page = parse_page(text);
        assert!(page.blocks[0].pre_block);
        assert_eq!(page.blocks[0].content, "title:: Foo\n\n");
        assert_eq!(page.blocks[1].content, "body\n");
        assert_eq!(render_page(&page), text);
    }

    #[test]
    fn unterminated_block_gets_newline_before_next() {
        let mut page = parse_page("- a\n- b");
        page.blocks[0].set_content("a\nx:: y");
        assert_eq!(render_page(&page), "- a\n  x:: y\n- b");
    }

    #[test]
    fn untouched_blocks_are_written_back_verbatim() {
        let text = "- Some notes\ncontinued\n-\n- last\n";
        let mut page = parse_page(text);
        assert_eq!(render_page(&page), text);

        page.blocks.insert(0, FileBlock::edited("created:: [[c]]\nupdated:: [[u]]\n"));
        assert_eq!(
            render_page(&page),
            "- created:: [[c]]\n  updated:: [[u]]\n- Some notes\ncontinued\n-\n- last\n"
        );
    }

    #[test]
    fn edited_block_keeps_its_line_prefixes() {
        let mut page = parse_page("- title:: Foo\nalias:: F\n\t- child\n- b\n");
        page.blocks[0].set_content("title:: Foo\nalias:: F\ncreated:: [[c]]\n");
        assert_eq!(
            render_page(&page),
            "- title:: Foo\nalias:: F\n  created:: [[c]]\n\t- child\n- b\n"
        );
    }

    #[test]
    fn empty_bullet_round_trips() {
        let text = "-\n- b\n";
        let mut page = parse_page(text);
        assert_eq!(page.blocks[0].content, "\n");
        assert_eq!(render_page(&page), text);

        page.blocks[0].set_content("\ncreated:: [[c]]\n");
        assert_eq!(render_page(&page), "-\n  created:: [[c]]\n- b\n");
    }

    #[test]
    fn demoted_pre_block_gets_a_bullet() {
        let mut page = parse_page("Some prose\nmore\n- body\n");
        assert!(page.blocks[0].pre_block);
        page.blocks[0].demote();
        page.blocks.insert(0, FileBlock::edited("created:: [[c]]\n"));
        assert_eq!(
            render_page(&page),
            "- created:: [[c]]\n- Some prose\n  more\n- body\n"
        );
    }

    #[test]
    fn block_ids_round_trip() {
        let id = block_id(&PageId::from("pages/a#b.md"), 3);
        assert_eq!(split_block_id(&id), Some((PageId::from("pages/a#b.md"), 3)));
        assert_eq!(split_block_id(&BlockId::from("nohash")), None);
    }

    #[test]
    fn names_decode_namespaces() {
        assert_eq!(page_name(Path::new("pages/proj___notes.md")), "proj/notes");
    }

    fn graph() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();
        fs::create_dir_all(dir.path().join("journals")).unwrap();
        fs::write(dir.path().join("pages/Foo.md"), "- title:: Foo\n- body\n").unwrap();
        fs::write(dir.path().join("journals/2024_01_01.md"), "- entry\n").unwrap();
        fs::write(dir.path().join("pages/notes.txt"), "ignored").unwrap();
        let store = GraphStore::open(dir.path(), &Settings::default()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn pages_and_blocks_from_folder() {
        let (dir, store) = graph();
        let page = store.find_page("foo").unwrap();
        assert_eq!(page.name, "Foo");
        assert!(!page.is_journal);
        assert!(page.updated_at > 0);

        let journal = store.get_page(&PageId::from("journals/2024_01_01.md")).await.unwrap().unwrap();
        assert!(journal.is_journal);

        let blocks = store.page_blocks(&page.id).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].content, "title:: Foo\n");

        let path = store.resolve_file_path(page.file.unwrap()).await.unwrap();
        assert_eq!(path, "pages/Foo.md");
        assert!(store.page_id_for(&dir.path().join("pages/notes.txt")).is_none());
    }

    #[tokio::test]
    async fn update_and_insert_rewrite_the_file() {
        let (dir, store) = graph();
        let page = store.find_page("Foo").unwrap();
        let first = block_id(&page.id, 0);

        store.update_block(&first, "title:: Foo\nupdated:: [[x]]\n").await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("pages/Foo.md")).unwrap(),
            "- title:: Foo\n  updated:: [[x]]\n- body\n"
        );

        let new_id = store.insert_block_before(&first, "created:: [[c]]\n").await.unwrap();
        assert_eq!(new_id, first);
        assert_eq!(
            fs::read_to_string(dir.path().join("pages/Foo.md")).unwrap(),
            "- created:: [[c]]\n- title:: Foo\n  updated:: [[x]]\n- body\n"
        );
    }

    #[tokio::test]
    async fn missing_blocks_are_none() {
        let (_dir, store) = graph();
        assert!(store.get_block(&BlockId::from("pages/Foo.md#9")).await.unwrap().is_none());
        assert!(store.get_block(&BlockId::from("pages/Nope.md#0")).await.unwrap().is_none());
        assert!(matches!(
            store.find_page("nope"),
            Err(StampError::NotFound { .. })
        ));
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = GraphStore::open("/definitely/not/here", &Settings::default());
        assert!(matches!(result, Err(StampError::DirectoryError { .. })));
    }
}
