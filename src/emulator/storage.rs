//! ROM and disk-image storage scanning

use std::path::Path;

use serde::Serialize;

/// Extensions recognized as disk images
const DISK_EXTENSIONS: &[&str] = &[".img", ".dsk", ".hfv", ".iso", ".toast"];

/// One scanned storage file
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Listing returned by the storage API
#[derive(Debug, Serialize)]
pub struct StorageListing {
    #[serde(rename = "romsPath")]
    pub roms_path: String,
    #[serde(rename = "imagesPath")]
    pub images_path: String,
    pub roms: Vec<FileInfo>,
    pub disks: Vec<FileInfo>,
}

/// Scan both storage directories. ROMs are scanned recursively with their
/// checksum word; disk images shallowly.
pub fn scan_storage(roms_dir: &Path, images_dir: &Path) -> StorageListing {
    let mut roms = vec![];
    scan_recursive(roms_dir, "", &[".rom"], true, &mut roms);
    roms.sort_by(|a, b| a.name.cmp(&b.name));

    let mut disks = scan_flat(images_dir, DISK_EXTENSIONS);
    disks.sort_by(|a, b| a.name.cmp(&b.name));

    StorageListing {
        roms_path: roms_dir.to_string_lossy().to_string(),
        images_path: images_dir.to_string_lossy().to_string(),
        roms,
        disks,
    }
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    let lower = name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// The classic Mac ROM checksum is the big-endian word in the first four
/// bytes; the browser uses it to identify the machine the ROM belongs to.
fn read_rom_checksum(path: &Path) -> Option<String> {
    let mut buf = [0u8; 4];
    let mut file = std::fs::File::open(path).ok()?;
    use std::io::Read;
    file.read_exact(&mut buf).ok()?;
    Some(format!("{:08x}", u32::from_be_bytes(buf)))
}

fn scan_flat(dir: &Path, extensions: &[&str]) -> Vec<FileInfo> {
    let mut files = vec![];
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return files,
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !has_extension(&name, extensions) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        files.push(FileInfo {
            name,
            size: meta.len(),
            checksum: None,
        });
    }
    files
}

fn scan_recursive(
    base: &Path,
    relative: &str,
    extensions: &[&str],
    checksums: bool,
    out: &mut Vec<FileInfo>,
) {
    let dir = if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    };
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let rel_name = if relative.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", relative, name)
        };
        let Ok(meta) = entry.metadata() else { continue };

        if meta.is_dir() {
            scan_recursive(base, &rel_name, extensions, checksums, out);
        } else if meta.is_file() && has_extension(&name, extensions) {
            let checksum = if checksums {
                read_rom_checksum(&entry.path())
            } else {
                None
            };
            out.push(FileInfo {
                name: rel_name,
                size: meta.len(),
                checksum,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn scans_roms_recursively_with_checksums() {
        let dir = tempfile::tempdir().unwrap();
        let roms = dir.path().join("roms");
        std::fs::create_dir_all(roms.join("quadra")).unwrap();

        let mut f = std::fs::File::create(roms.join("quadra/q900.rom")).unwrap();
        f.write_all(&[0x3D, 0xC2, 0x78, 0x23, 0xFF, 0xFF]).unwrap();
        std::fs::write(roms.join("notes.txt"), "not a rom").unwrap();

        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("System753.dsk"), vec![0u8; 128]).unwrap();
        std::fs::write(images.join(".hidden.img"), vec![0u8; 16]).unwrap();

        let listing = scan_storage(&roms, &images);

        assert_eq!(listing.roms.len(), 1);
        assert_eq!(listing.roms[0].name, "quadra/q900.rom");
        assert_eq!(listing.roms[0].checksum.as_deref(), Some("3dc27823"));

        assert_eq!(listing.disks.len(), 1);
        assert_eq!(listing.disks[0].name, "System753.dsk");
        assert_eq!(listing.disks[0].size, 128);
    }

    #[test]
    fn missing_directories_yield_empty_listing() {
        let listing = scan_storage(Path::new("/nonexistent/roms"), Path::new("/nonexistent/images"));
        assert!(listing.roms.is_empty());
        assert!(listing.disks.is_empty());
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(has_extension("Disk.IMG", DISK_EXTENSIONS));
        assert!(has_extension("cd.Toast", DISK_EXTENSIONS));
        assert!(!has_extension("readme.md", DISK_EXTENSIONS));
    }
}
