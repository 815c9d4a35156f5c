/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 */

//! User-level `spawn` (`SPEC_FULL.md` §4.G): ELF loading into a freshly
//! forked child, argv stack construction, and propagation of pages the
//! caller has marked to follow into any spawned child.

use exonucleus_abi::{
    page_round_down, EnvId, EnvStatus, Perm, Syscalls, Trapframe, UserMemory, ENVID_SELF,
    PAGE_SIZE, USTACKTOP, UTEMP,
};
use xmas_elf::program::{self, Type};
use xmas_elf::ElfFile;

/// The program image `spawn` loads from: ELF header/program-header bytes
/// plus the out-of-scope file server's zero-copy lookup for read-only
/// segment pages (`SPEC_FULL.md` §4.G step 4, §6 `read_map`).
pub trait ProgramImage {
    /// The full image: ELF header, program headers, and every segment's
    /// on-disk bytes.
    fn bytes(&self) -> &[u8];

    /// Zero-copy lookup for the page-aligned `file_offset`: the file
    /// server's own env and the virtual address inside it backing that
    /// offset, so the page can be `page_map`'d directly into the child
    /// instead of copied. `None` means the file server has no such page
    /// mapped yet, which a real client would fault in; this runtime treats
    /// it as a caller-supplied-image bug.
    fn read_map(&self, file_offset: usize) -> Option<(EnvId, usize)>;
}

/// Failure modes specific to `spawn` itself, as distinct from the syscall
/// failures it panics on (`SPEC_FULL.md` §10.2: those indicate a broken
/// invariant, these indicate a malformed caller input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The image's ELF header failed to parse (bad magic or malformed
    /// header), per §4.G.1: rejected before any program header is read.
    BadElfHeader,
    /// `argv` plus its pointer array and `(argc, argv)` trailer would not
    /// fit in one page (`SPEC_FULL.md` §4.G step 3).
    ArgvTooLarge,
}

/// Upper bound on `argv.len()` this implementation will lay out. No-std, no
/// allocator: string offsets are collected into a stack array.
const MAX_SPAWN_ARGV: usize = 64;

/// Check that `argv` plus its pointer array and `(argc, argv)` trailer fits
/// in one page, before any syscall has run — so a too-large `argv` is
/// rejected without leaving a half-built child behind.
fn check_argv_fits_one_page(argv: &[&str]) -> Result<(), SpawnError> {
    let argc = argv.len();
    if argc > MAX_SPAWN_ARGV {
        return Err(SpawnError::ArgvTooLarge);
    }
    let strings_len: usize = argv.iter().map(|s| s.len() + 1).sum();
    let ptr_array_len = (argc + 1) * 4; // one u32 per string plus a trailing null
    let trailer_len = 8; // argc: u32, argv_ptr: u32
    if strings_len + ptr_array_len + trailer_len > PAGE_SIZE {
        return Err(SpawnError::ArgvTooLarge);
    }
    Ok(())
}

/// Build the child's initial stack page at the parent's `UTEMP` scratch
/// address, map it into the child at `USTACKTOP - PAGE_SIZE`, and return the
/// child-side `esp` the entry trapframe needs. Caller must have already
/// validated the layout fits with [`check_argv_fits_one_page`].
fn build_argv_stack<S: Syscalls + UserMemory>(sys: &mut S, child: EnvId, argv: &[&str]) -> u32 {
    let argc = argv.len();
    let ptr_array_len = (argc + 1) * 4;
    let trailer_len = 8;

    let mut buf = [0u8; PAGE_SIZE];
    let mut string_offsets = [0usize; MAX_SPAWN_ARGV];

    // Strings from the top of the page downward.
    let mut cursor = PAGE_SIZE;
    for (i, s) in argv.iter().enumerate() {
        cursor -= s.len() + 1;
        buf[cursor..cursor + s.len()].copy_from_slice(s.as_bytes());
        buf[cursor + s.len()] = 0;
        string_offsets[i] = cursor;
    }

    // Pointer array immediately below the strings, child-side addresses,
    // null-terminated.
    let ptr_array_offset = cursor - ptr_array_len;
    for (i, &off) in string_offsets[..argc].iter().enumerate() {
        let child_ptr = (USTACKTOP - PAGE_SIZE + off) as u32;
        let dst = ptr_array_offset + i * 4;
        buf[dst..dst + 4].copy_from_slice(&child_ptr.to_ne_bytes());
    }
    let null_off = ptr_array_offset + argc * 4;
    buf[null_off..null_off + 4].copy_from_slice(&0u32.to_ne_bytes());

    // `(argc, argv)` trailer directly below the pointer array: the child's
    // initial stack top.
    let trailer_offset = ptr_array_offset - trailer_len;
    let argv_child_ptr = (USTACKTOP - PAGE_SIZE + ptr_array_offset) as u32;
    buf[trailer_offset..trailer_offset + 4].copy_from_slice(&(argc as u32).to_ne_bytes());
    buf[trailer_offset + 4..trailer_offset + 8].copy_from_slice(&argv_child_ptr.to_ne_bytes());

    sys.page_alloc(ENVID_SELF, UTEMP, Perm::PRESENT | Perm::USER | Perm::WRITE)
        .unwrap_or_else(|e| panic!("spawn: page_alloc UTEMP: {e}"));
    sys.write_mem(UTEMP, &buf)
        .unwrap_or_else(|e| panic!("spawn: write argv stack: {e}"));
    sys.page_map(
        ENVID_SELF,
        UTEMP,
        child,
        USTACKTOP - PAGE_SIZE,
        Perm::PRESENT | Perm::USER | Perm::WRITE,
    )
    .unwrap_or_else(|e| panic!("spawn: map argv stack into child: {e}"));
    sys.page_unmap(ENVID_SELF, UTEMP)
        .unwrap_or_else(|e| panic!("spawn: unmap parent UTEMP: {e}"));

    (USTACKTOP - PAGE_SIZE + trailer_offset) as u32
}

/// Load one `PT_LOAD` program header into `child`, page by page.
fn load_segment<S: Syscalls + UserMemory, P: ProgramImage>(
    sys: &mut S,
    image: &P,
    child: EnvId,
    ph: program::ProgramHeader<'_>,
) {
    let file_offset = ph.offset() as usize;
    let virt_addr = ph.virtual_addr() as usize;
    let file_size = ph.file_size() as usize;
    let mem_size = ph.mem_size() as usize;
    let writable = ph.flags().is_write();

    let seg_start = page_round_down(virt_addr);
    let seg_file_start = page_round_down(file_offset);
    let seg_end = virt_addr + mem_size;

    let mut va = seg_start;
    while va < seg_end {
        if writable {
            load_writable_page(sys, image, child, va, virt_addr, file_offset, file_size);
        } else {
            // `p_offset mod PAGE == p_va mod PAGE` is guaranteed by the
            // linker (`SPEC_FULL.md` §4.G.1), so the page-aligned file
            // offset for `va` tracks the page-aligned virtual offset.
            let file_page_offset = seg_file_start + (va - seg_start);
            let (file_env, file_va) = image.read_map(file_page_offset).unwrap_or_else(|| {
                panic!("spawn: read_map has no page for file offset {file_page_offset:#x}")
            });
            sys.page_map(file_env, file_va, child, va, Perm::PRESENT | Perm::USER)
                .unwrap_or_else(|e| panic!("spawn: map read-only segment at {va:#x}: {e}"));
        }
        va += PAGE_SIZE;
    }
}

/// Load one writable page of a `PT_LOAD` segment: copy whatever file bytes
/// overlap `[va, va + PAGE_SIZE)`, zero-fill the rest (the BSS tail),
/// through a parent-side temp mapping.
fn load_writable_page<S: Syscalls + UserMemory, P: ProgramImage>(
    sys: &mut S,
    image: &P,
    child: EnvId,
    va: usize,
    virt_addr: usize,
    file_offset: usize,
    file_size: usize,
) {
    let mut buf = [0u8; PAGE_SIZE];
    let seg_file_end = virt_addr + file_size;
    let page_end = va + PAGE_SIZE;
    let copy_start = core::cmp::max(va, virt_addr);
    let copy_end = core::cmp::min(page_end, seg_file_end);
    if copy_start < copy_end {
        let file_pos = file_offset + (copy_start - virt_addr);
        let len = copy_end - copy_start;
        let dst_off = copy_start - va;
        buf[dst_off..dst_off + len].copy_from_slice(&image.bytes()[file_pos..file_pos + len]);
    }

    sys.page_alloc(ENVID_SELF, UTEMP, Perm::PRESENT | Perm::USER | Perm::WRITE)
        .unwrap_or_else(|e| panic!("spawn: page_alloc UTEMP for {va:#x}: {e}"));
    sys.write_mem(UTEMP, &buf)
        .unwrap_or_else(|e| panic!("spawn: write segment page: {e}"));
    sys.page_map(
        ENVID_SELF,
        UTEMP,
        child,
        va,
        Perm::PRESENT | Perm::USER | Perm::WRITE,
    )
    .unwrap_or_else(|e| panic!("spawn: map segment page at {va:#x}: {e}"));
    sys.page_unmap(ENVID_SELF, UTEMP)
        .unwrap_or_else(|e| panic!("spawn: unmap parent UTEMP: {e}"));
}

/// Upper bound on the number of `AVAIL_SHARE`-marked pages `spawn` will
/// propagate in one call; see the same tradeoff noted on `fork`'s
/// `MAX_FORK_MAPPINGS`.
const MAX_PROPAGATED_PAGES: usize = 256;

/// Propagate every caller page marked `AVAIL_SHARE` into `child` at the same
/// address and permissions (`SPEC_FULL.md` §4.G step 5).
fn propagate_shared_pages<S: Syscalls>(sys: &mut S, child: EnvId) {
    let mut pages = [(0usize, Perm::empty()); MAX_PROPAGATED_PAGES];
    let mut count = 0;
    sys.for_each_user_page(&mut |va, perm| {
        if perm.contains(Perm::AVAIL_SHARE) && count < MAX_PROPAGATED_PAGES {
            pages[count] = (va, perm);
            count += 1;
        }
    });
    for &(va, perm) in &pages[..count] {
        sys.page_map(ENVID_SELF, va, child, va, perm)
            .unwrap_or_else(|e| panic!("spawn: propagate shared page at {va:#x}: {e}"));
    }
}

/// Spawn `image` as a child with the given `argv`, loading `PT_LOAD`
/// segments, building the argv stack, and starting it at the ELF entry
/// point. Every syscall failure here panics (`SPEC_FULL.md` §10.2); only
/// the caller-input problems named by [`SpawnError`] are returned.
pub fn spawn<S: Syscalls + UserMemory, P: ProgramImage>(
    sys: &mut S,
    image: &P,
    argv: &[&str],
) -> Result<EnvId, SpawnError> {
    let elf = ElfFile::new(image.bytes()).map_err(|_| SpawnError::BadElfHeader)?;
    check_argv_fits_one_page(argv)?;

    let child = sys.exofork().unwrap_or_else(|e| panic!("spawn: exofork: {e}"));

    let esp = build_argv_stack(sys, child, argv);

    for ph in elf.program_iter() {
        if ph.get_type() != Ok(Type::Load) {
            continue;
        }
        load_segment(sys, image, child, ph);
    }

    propagate_shared_pages(sys, child);

    let mut tf = Trapframe::default();
    tf.eip = elf.header.pt2.entry_point() as u32;
    tf.esp = esp;
    sys.env_set_trapframe(child, tf)
        .unwrap_or_else(|e| panic!("spawn: env_set_trapframe: {e}"));
    sys.env_set_status(child, EnvStatus::Runnable)
        .unwrap_or_else(|e| panic!("spawn: env_set_status: {e}"));

    log::info!("spawn: child {child:?} runnable at entry {:#x}", tf.eip);
    Ok(child)
}
