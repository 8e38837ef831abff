//! Extension-based binary detection.
//!
//! Binary files never enter text reads, prompt context or grep; they still
//! materialise to disk for external commands.

const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "tif", "psd",
    // audio / video
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4", "avi", "mkv", "mov", "webm",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "jar",
    // executables and build output
    "exe", "dll", "so", "dylib", "bin", "o", "a", "lib", "pyc", "class", "wasm", "pdb",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
    // data
    "db", "sqlite", "sqlite3", "parquet", "npy", "npz", "h5",
    // misc
    "iso", "img", "dmg", "deb", "rpm", "msi", "apk",
];

/// True when the path's extension marks it as binary.
pub fn is_binary_path(path: &str) -> bool {
    let Some((_, ext)) = path.rsplit_once('.') else {
        return false;
    };
    if ext.contains('/') {
        // The last dot belongs to a directory name, not an extension.
        return false;
    }
    let ext = ext.to_ascii_lowercase();
    BINARY_EXTENSIONS.contains(&ext.as_str())
}
