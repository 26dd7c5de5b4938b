//! Asset classification and emission naming.
//!
//! Every binary asset referenced by the graph is either inlined into its
//! referencing module (small files, encoded as a data URI) or emitted as a
//! standalone output file. The decision is a pure function of
//! `(size, mime hint, threshold)`: strictly below the threshold inlines,
//! at or above it emits. No fallback heuristics.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Rough media kind, used to pick the inline encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Svg,
    Font,
    Other,
}

impl AssetKind {
    /// Classify by file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "ico" | "avif" => Some(AssetKind::Image),
            "svg" => Some(AssetKind::Svg),
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Some(AssetKind::Font),
            "txt" | "xml" | "wasm" | "bin" => Some(AssetKind::Other),
            _ => None,
        }
    }

    /// Is this extension handled by the asset policy (as opposed to a loader
    /// rule)?
    #[must_use]
    pub fn is_asset(ext: &str) -> bool {
        Self::from_extension(ext).is_some()
    }
}

/// MIME hint for an asset path.
#[must_use]
pub fn mime_hint(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    match ext.to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "wasm" => "application/wasm",
        "txt" => "text/plain",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// How an asset will appear in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Embedded into the referencing module as an encoded data URI.
    Inline { encoded: String },
    /// Written as a standalone output file at this path (relative to the
    /// output directory).
    Emitted { output_path: String },
}

/// The inline-vs-emit decision rule.
#[derive(Debug, Clone, Copy)]
pub struct AssetPolicy {
    threshold: u64,
}

impl AssetPolicy {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// `size < threshold` inlines; the boundary itself emits.
    #[must_use]
    pub fn should_inline(&self, size_bytes: u64) -> bool {
        size_bytes < self.threshold
    }

    /// Encode content for inlining, chosen by MIME hint: SVG stays a text
    /// URI (percent-escaped), everything else becomes base64.
    #[must_use]
    pub fn encode_inline(&self, content: &[u8], mime: &str) -> String {
        if mime == "image/svg+xml" {
            format!(
                "data:image/svg+xml,{}",
                escape_svg(&String::from_utf8_lossy(content))
            )
        } else {
            format!("data:{mime};base64,{}", BASE64.encode(content))
        }
    }
}

/// Percent-escape the characters that break an SVG data URI in attribute
/// position. Everything else stays readable text.
fn escape_svg(svg: &str) -> String {
    let mut out = String::with_capacity(svg.len());
    for c in svg.chars() {
        match c {
            '%' => out.push_str("%25"),
            '#' => out.push_str("%23"),
            '"' => out.push_str("%22"),
            '<' => out.push_str("%3C"),
            '>' => out.push_str("%3E"),
            '\n' | '\r' => out.push_str("%0A"),
            c => out.push(c),
        }
    }
    out
}

/// Assigns deterministic, collision-safe output paths for emitted assets.
///
/// The preferred name is `assets/{stem}.{ext}`. When a second, distinct
/// source asset would claim the same name, an 8-character content hash is
/// infixed: `assets/{stem}.{hash8}.{ext}`. The namer persists across
/// incremental rebuilds so names stay stable.
#[derive(Debug, Default)]
pub struct AssetNamer {
    /// Claimed output path -> source path that owns it.
    claimed: FxHashMap<String, PathBuf>,
    /// Source path -> its current claim, so re-claiming with new content
    /// releases the superseded name instead of leaking it.
    by_source: FxHashMap<PathBuf, String>,
}

impl AssetNamer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an output path for `source`. Re-claiming from the same source
    /// returns the existing name unless the content hash it was derived from
    /// changed, in which case the old claim is dropped.
    pub fn output_path(
        &mut self,
        source: &Path,
        content: &[u8],
    ) -> Result<String, crate::error::EmitError> {
        let stem = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("asset");
        let ext = source
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("bin");

        let plain = format!("assets/{stem}.{ext}");
        let name = match self.claimed.get(&plain) {
            None => plain,
            Some(owner) if owner == source => plain,
            Some(_) => {
                let hash = short_hash(content);
                let hashed = format!("assets/{stem}.{hash}.{ext}");
                match self.claimed.get(&hashed) {
                    Some(owner) if owner != source => {
                        // Same stem, same content hash, different source:
                        // unresolvable.
                        return Err(crate::error::EmitError::NamingCollision { name: hashed });
                    }
                    _ => hashed,
                }
            }
        };

        if let Some(previous) = self.by_source.insert(source.to_path_buf(), name.clone()) {
            if previous != name {
                self.claimed.remove(&previous);
            }
        }
        self.claimed.insert(name.clone(), source.to_path_buf());
        Ok(name)
    }
}

/// First 8 hex chars of the blake3 hash.
#[must_use]
pub fn short_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().as_str()[..8].to_string()
}
