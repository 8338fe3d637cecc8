//! # System Call Dispatch
//!
//! One gate: `int 0x80`. There is a single ring here, so entry is a plain
//! trap, not a `syscall`/`sysret` ring transition — no GS swap, no SMAP
//! STAC/CLAC, no user/kernel stack handoff. The ABI is a fixed, numbered
//! set of 13 operations; each one checks the caller's capability bit
//! before touching kernel state, and every failure converts to a negative
//! errno only at this boundary.

use crate::mana_pool::capability_store::Capabilities;

/// Saved registers on kernel stack, pushed by `syscall_entry` in the order
/// the naked assembly below pushes them.
#[repr(C)]
struct SavedRegisters {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    r11: u64,
    r10: u64, // arg4
    r9: u64,  // arg6
    r8: u64,  // arg5
    rbp: u64,
    rdi: u64, // arg1
    rsi: u64, // arg2
    rdx: u64, // arg3
    rcx: u64,
    rbx: u64,
    rax: u64, // syscall number
}

unsafe extern "C" fn syscall_handler_rust(regs: *const SavedRegisters) -> i64 {
    let regs = &*regs;
    dispatch_syscall(regs.rax, regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9)
}

/// `int 0x80` entry point: save every GP register, call the dispatcher
/// with a pointer to them, restore, and `iretq` back to the caller.
#[unsafe(naked)]
pub extern "C" fn syscall_entry() {
    core::arch::naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",

        "mov rdi, rsp",
        "call {handler}",

        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "add rsp, 8", // drop saved rax, the return value is already in rax

        "iretq",

        handler = sym syscall_handler_rust,
    )
}

pub mod syscall_numbers {
    pub const SYS_READ: u64 = 0;
    pub const SYS_WRITE: u64 = 1;
    pub const SYS_GETPID: u64 = 20;
    pub const SYS_YIELD: u64 = 24;
    pub const SYS_SLEEP: u64 = 35;
    pub const SYS_EXIT: u64 = 60;
    pub const SYS_MSGSND: u64 = 71;
    pub const SYS_MSGRCV: u64 = 72;
    pub const SYS_UPTIME: u64 = 96;
    pub const SYS_MEMINFO: u64 = 97;
    pub const SYS_TASKINFO: u64 = 98;
    pub const SYS_GETTIME_NS: u64 = 99;
    pub const SYS_GETFREQ: u64 = 100;
}

pub type SyscallResult = i64;

#[repr(i64)]
#[derive(Debug, Clone, Copy)]
pub enum SyscallError {
    EFAULT = -14,
    EINVAL = -22,
    EPERM = -1,
    ESRCH = -3,
}

impl From<SyscallError> for SyscallResult {
    fn from(err: SyscallError) -> Self {
        err as i64
    }
}

const MAX_IO_LEN: u64 = 4096;
const USER_SPACE_LIMIT: u64 = 0x8000_0000_0000;

fn validate_buffer(ptr: u64, len: u64) -> Result<(), SyscallError> {
    if len > MAX_IO_LEN {
        return Err(SyscallError::EINVAL);
    }
    if ptr >= USER_SPACE_LIMIT || ptr.checked_add(len).map_or(true, |end| end > USER_SPACE_LIMIT) {
        return Err(SyscallError::EFAULT);
    }
    Ok(())
}

fn require(bit: Capabilities) -> Result<(), SyscallError> {
    let pid = super::current_pid();
    if crate::mana_pool::capabilities().check(pid, bit) {
        Ok(())
    } else {
        Err(SyscallError::EPERM)
    }
}

pub unsafe fn dispatch_syscall(
    num: u64,
    arg1: u64,
    arg2: u64,
    arg3: u64,
    arg4: u64,
    _arg5: u64,
    _arg6: u64,
) -> SyscallResult {
    use syscall_numbers::*;
    let result = match num {
        SYS_READ => sys_read(arg1, arg2, arg3),
        SYS_WRITE => sys_write(arg1, arg2, arg3),
        SYS_GETPID => Ok(super::current_pid() as i64),
        SYS_YIELD => sys_yield(),
        SYS_SLEEP => sys_sleep(arg1),
        SYS_EXIT => sys_exit(),
        SYS_MSGSND => sys_msgsnd(arg1, arg2, arg3),
        SYS_MSGRCV => sys_msgrcv(arg1, arg2, arg3),
        SYS_UPTIME => Ok(crate::attunement::timer::now_ms() as i64 / 1000),
        SYS_MEMINFO => Ok(crate::mana_pool::heap_stats().free_bytes as i64),
        SYS_TASKINFO => sys_taskinfo(arg1),
        SYS_GETTIME_NS => Ok(crate::attunement::timer::now_ms() as i64 * 1_000_000),
        SYS_GETFREQ => Ok(crate::attunement::timer::tsc_khz() as i64),
        // Unknown syscall numbers return -1, same as a permission denial.
        _ => Err(SyscallError::EPERM),
    };
    result.unwrap_or_else(SyscallResult::from)
}

fn sys_read(fd: u64, buf: u64, count: u64) -> Result<i64, SyscallError> {
    require(Capabilities::IO_READ)?;
    if fd != 0 {
        return Err(SyscallError::EINVAL);
    }
    validate_buffer(buf, count)?;
    let slice = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count as usize) };
    let n = crate::attunement::keyboard::read(slice);
    Ok(n as i64)
}

fn sys_write(fd: u64, buf: u64, count: u64) -> Result<i64, SyscallError> {
    require(Capabilities::IO_WRITE)?;
    if fd != 1 && fd != 2 {
        return Err(SyscallError::EINVAL);
    }
    validate_buffer(buf, count)?;
    let slice = unsafe { core::slice::from_raw_parts(buf as *const u8, count as usize) };
    for &byte in slice {
        crate::console::write_byte(byte);
    }
    Ok(count as i64)
}

fn sys_yield() -> Result<i64, SyscallError> {
    super::yield_now();
    Ok(0)
}

fn sys_sleep(ms: u64) -> Result<i64, SyscallError> {
    let now = crate::attunement::timer::now_ms();
    super::sleep(now, ms);
    Ok(0)
}

fn sys_exit() -> Result<i64, SyscallError> {
    super::exit();
}

fn sys_msgsnd(target: u64, ptr: u64, len: u64) -> Result<i64, SyscallError> {
    require(Capabilities::MSG_SEND)?;
    validate_buffer(ptr, len)?;
    let slice = unsafe { core::slice::from_raw_parts(ptr as *const u8, len as usize) };
    let sender = super::current_pid();
    crate::nexus::send(sender, target as usize, slice)
        .map(|_| 0)
        .map_err(|_| SyscallError::EINVAL)
}

fn sys_msgrcv(buf: u64, maxlen: u64, _arg3: u64) -> Result<i64, SyscallError> {
    require(Capabilities::MSG_RECEIVE)?;
    validate_buffer(buf, maxlen)?;
    let slice = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, maxlen as usize) };
    let receiver = super::current_pid();
    crate::nexus::receive(receiver, slice)
        .map(|n| n as i64)
        .map_err(|_| SyscallError::EINVAL)
}

fn sys_taskinfo(pid: u64) -> Result<i64, SyscallError> {
    super::scheduler()
        .permission_mask(pid as usize)
        .map(|mask| mask as i64)
        .ok_or(SyscallError::ESRCH)
}
