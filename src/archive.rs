//! `ar` / thin-ar demultiplexing. spec.md §1 treats archive parsing as an
//! external collaborator, but SPEC_FULL §0/§1 notes no such collaborator is
//! wired into this build, so it lives here instead — generalizing the
//! inline archive loop the teacher already has in `link.rs::parse_files`
//! (which calls `object::read::archive::ArchiveFile::parse` directly in the
//! middle of its parse loop) into thin-archive-aware, priority-tagged members.

use anyhow::{Context as _, Result};
use object::read::archive::{ArchiveFile, ArchiveKind};

/// One member extracted from an archive: its synthetic name (`archive/member`,
/// matching the teacher's own naming convention in `link.rs`) and its bytes.
/// For a thin archive, `data` is read from the referenced external file
/// rather than embedded in the archive body.
pub struct ArchiveMember {
    pub name: String,
    pub data: Vec<u8>,
}

/// Parses `content` (the full byte content of an `.a` file at `archive_path`)
/// and returns every member in archive order. Thin archives (`!<thin>`
/// magic) store members as bare paths relative to the archive's own
/// directory; regular archives embed member data inline.
pub fn read_members(archive_path: &str, content: &[u8]) -> Result<Vec<ArchiveMember>> {
    let archive = ArchiveFile::parse(content)
        .with_context(|| format!("parsing {archive_path} as an archive"))?;
    let base_dir = std::path::Path::new(archive_path)
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    let mut members = Vec::new();
    for member in archive.members() {
        let member = member.with_context(|| format!("reading member table of {archive_path}"))?;
        let member_name = String::from_utf8_lossy(member.name()).into_owned();
        let full_name = format!("{archive_path}/{member_name}");

        let data = if archive.kind() == ArchiveKind::GnuThin {
            let member_path = base_dir.join(&member_name);
            std::fs::read(&member_path)
                .with_context(|| format!("reading thin archive member {}", member_path.display()))?
        } else {
            member.data(content)
                .with_context(|| format!("reading member data for {full_name}"))?
                .to_vec()
        };

        members.push(ArchiveMember { name: full_name, data });
    }
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_archive_content() {
        let err = read_members("bad.a", b"not an archive").unwrap_err();
        assert!(format!("{err:#}").contains("bad.a"));
    }
}
