use goblin::Object as GoblinObject;
use goblin::elf::Elf;

use super::{Finding, FindingKind};

const WEAK_CRYPTO_LIBS: &[&str] = &["libssl", "libcrypto", "libcrypt"];
const UNSAFE_IMPORTS: &[&str] = &["strcpy", "strcat", "gets", "sprintf", "scanf", "system", "popen"];

/// Opportunistic inspection of ELF binaries: linked libraries and unsafe imports.
///
/// Anything that does not parse as ELF yields nothing.
pub fn inspect_elf(source_file: &str, contents: &[u8]) -> Vec<Finding> {
    if !contents.starts_with(b"\x7fELF") {
        return Vec::new();
    }
    match GoblinObject::parse(contents) {
        Ok(GoblinObject::Elf(elf)) => elf_findings(source_file, &elf),
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!("ELF parse failed for {}: {}", source_file, e);
            Vec::new()
        }
    }
}

fn elf_findings(source_file: &str, elf: &Elf) -> Vec<Finding> {
    let mut findings = Vec::new();

    for lib in &elf.libraries {
        let lower = lib.to_lowercase();
        if WEAK_CRYPTO_LIBS.iter().any(|weak| lower.contains(weak)) {
            findings.push(Finding::new(
                FindingKind::UnsafeLibrary,
                source_file,
                0,
                format!("Links against {}", lib),
            ));
        }
    }

    for sym in elf.dynsyms.iter() {
        // Imports are undefined dynamic symbols.
        if !sym.is_import() {
            continue;
        }
        let Some(name) = elf.dynstrtab.get_at(sym.st_name) else {
            continue;
        };
        if UNSAFE_IMPORTS.contains(&name) {
            findings.push(Finding::new(
                FindingKind::DangerousFunction,
                source_file,
                0,
                format!("Imports {}", name),
            ));
        }
    }

    findings
}
