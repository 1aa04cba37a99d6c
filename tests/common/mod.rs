//! Shared helpers: in-test PDF generation and a qpdf-backed stand-in for
//! the external processing tool.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pdf_workbench::config::SplitPolicy;
use pdf_workbench::ops::OperationExecutor;
use pdf_workbench::pdf::{expand_all, parse_page_range, QpdfWrapper};
use pdf_workbench::tool::{CommandRunner, ToolInvocation, ToolInvoker};
use pdf_workbench::workspace::WorkspaceManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// A valid PDF with `pages` empty Letter-sized pages
pub fn minimal_pdf(pages: u32) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages
        ),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, object).as_bytes());
    }

    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

pub fn page_count_of(path: &Path) -> u32 {
    QpdfWrapper::page_count(&std::fs::read(path).unwrap()).unwrap()
}

/// How the stand-in tool misbehaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    /// `split` exits 1
    SplitFails,
    /// `info` exits 1
    InfoFails,
    /// `split` exits 0 but prints something that is not JSON
    SplitGarbage,
    /// `split` exits 1 when its input is the window document `batch_<k>.pdf`
    SplitFailsOnBatch(usize),
    /// every sub-command exits 3 with a message on stderr
    AllFail,
}

/// Emulates the tool's argument protocol with qpdf
pub struct LibraryTool {
    fault: Fault,
    calls: Mutex<Vec<Vec<String>>>,
}

impl LibraryTool {
    pub fn new() -> Self {
        Self::with_fault(Fault::None)
    }

    pub fn with_fault(fault: Fault) -> Self {
        Self {
            fault,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some(subcommand))
            .count()
    }

    fn execute(&self, args: &[String]) -> Result<String, (i32, String)> {
        let fail = |msg: &str| (1, msg.to_string());
        let read = |path: &String| std::fs::read(path).map_err(|e| fail(&e.to_string()));

        if self.fault == Fault::AllFail {
            return Err((3, "Error loading PDF file".to_string()));
        }

        match args.first().map(String::as_str) {
            Some("merge") => {
                let inputs: Vec<Vec<u8>> = args[2..].iter().map(read).collect::<Result<_, _>>()?;
                let refs: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();
                let merged = QpdfWrapper::merge(&refs).map_err(|e| fail(&e.to_string()))?;
                std::fs::write(&args[1], merged).map_err(|e| fail(&e.to_string()))?;
                Ok(String::new())
            }
            Some("split") => {
                match self.fault {
                    Fault::SplitFails => return Err(fail("split failed")),
                    Fault::SplitGarbage => return Ok("Done splitting!".to_string()),
                    Fault::SplitFailsOnBatch(k) if args[1].ends_with(&format!("batch_{}.pdf", k)) => {
                        return Err(fail("batch split failed"))
                    }
                    _ => {}
                }
                let data = read(&args[1])?;
                let total = QpdfWrapper::page_count(&data).map_err(|e| fail(&e.to_string()))?;
                let tokens = match args.get(3) {
                    Some(expr) => {
                        parse_page_range(expr, total).map_err(|e| fail(&e.to_string()))?
                    }
                    None => expand_all(total),
                };

                let mut files = Vec::with_capacity(tokens.len());
                for token in tokens {
                    let doc = QpdfWrapper::extract_window(&data, token.start, token.end)
                        .map_err(|e| fail(&e.to_string()))?;
                    let path = format!("{}_page_{}.pdf", args[2], token.start);
                    std::fs::write(&path, doc).map_err(|e| fail(&e.to_string()))?;
                    files.push(serde_json::json!({ "path": path, "page_number": token.start }));
                }
                Ok(serde_json::json!({ "files": files }).to_string())
            }
            Some("info") => {
                if self.fault == Fault::InfoFails {
                    return Err(fail("info failed"));
                }
                let data = read(&args[1])?;
                let total = QpdfWrapper::page_count(&data).map_err(|e| fail(&e.to_string()))?;
                Ok(serde_json::json!({ "pageCount": total, "producer": "LibraryTool" }).to_string())
            }
            Some("compress" | "rotate" | "watermark" | "protect" | "unlock") => {
                std::fs::copy(&args[1], &args[2]).map_err(|e| fail(&e.to_string()))?;
                Ok(String::new())
            }
            _ => Err((2, "unknown command".to_string())),
        }
    }
}

#[async_trait]
impl CommandRunner for LibraryTool {
    async fn run(&self, args: &[String]) -> ToolInvocation {
        self.calls.lock().push(args.to_vec());
        let started = Instant::now();
        let (exit_code, stdout, stderr) = match self.execute(args) {
            Ok(stdout) => (0, stdout, String::new()),
            Err((code, stderr)) => (code, String::new(), stderr),
        };
        ToolInvocation::completed(args.to_vec(), exit_code, stdout, stderr, started.elapsed())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub tool: Arc<LibraryTool>,
    pub executor: OperationExecutor,
}

impl Harness {
    pub fn new(fault: Fault) -> Self {
        Self::with_policy(fault, SplitPolicy::default())
    }

    pub fn with_policy(fault: Fault, policy: SplitPolicy) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        Self::rooted(dir, &root, fault, policy)
    }

    /// Data root given relative to the working directory, as the default
    /// configuration does
    pub fn relative(fault: Fault) -> Self {
        let dir = TempDir::new_in(".").unwrap();
        let root = PathBuf::from(dir.path().file_name().unwrap()).join("data");
        assert!(root.is_relative());
        Self::rooted(dir, &root, fault, SplitPolicy::default())
    }

    fn rooted(dir: TempDir, root: &Path, fault: Fault, policy: SplitPolicy) -> Self {
        let tool = Arc::new(LibraryTool::with_fault(fault));
        let workspaces = WorkspaceManager::new(root).unwrap();
        let executor = OperationExecutor::new(workspaces, ToolInvoker::new(tool.clone()), policy);
        Self {
            dir,
            tool,
            executor,
        }
    }

    pub fn temp_is_empty(&self) -> bool {
        std::fs::read_dir(self.executor.workspaces().temp_dir())
            .unwrap()
            .next()
            .is_none()
    }
}
