//! Element factory and out-of-band request dispatch
//!
//! Clients create named elements from a class and a fixed attribute block,
//! then drive them by minor number through [`Core::oob_ioctl`]. Requests and
//! replies are the `#[repr(C)]` structures of [`evl_api::abi`], decoded from
//! and encoded to raw bytes.

use alloc::collections::BTreeMap;
use alloc::string::String;
use core::mem::size_of;

use bytemuck::Pod;
use evl_api::abi::{
    ElementClass, ElementIds, LockReq, MONITOR_EVENT, MONITOR_GATE, MonitorAttrs, MutexAttrs,
    PROTO_PI, PROTO_PP, SIGNAL_BROADCAST, SemAttrs, SemFlags, SignalReq, UnwaitReq, WaitReq,
    monitor_ioc, mutex_ioc, sem_ioc,
};
use evl_api::{Error, FundleT, NO_HANDLE, Result, Timeout, TimeoutMode};
use hashbrown::HashMap;

use crate::clock::ClockId;
use crate::heap::HeapOffset;
use crate::kernel::Core;
use crate::sync::monitor::MonitorId;
use crate::sync::mutex::{MutexId, MutexProtocol};
use crate::sync::semaphore::SemId;
use crate::thread::ThreadId;
use crate::wait::Outcome;

/// Object standing behind an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementObject {
    Mutex(MutexId),
    Semaphore(SemId),
    Monitor(MonitorId),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub class: ElementClass,
    pub name: String,
    pub fundle: FundleT,
    pub object: ElementObject,
    pub state: HeapOffset,
}

#[derive(Debug, Default)]
pub(crate) struct ElementRegistry {
    by_minor: BTreeMap<u32, Element>,
    by_name: HashMap<(ElementClass, String), u32>,
    by_fundle: HashMap<FundleT, u32>,
    next_minor: u32,
}

impl ElementRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_fundle(&self, fundle: FundleT) -> bool {
        self.by_fundle.contains_key(&fundle)
    }

    fn lookup(&self, class: ElementClass, name: &str) -> Option<u32> {
        self.by_name.get(&(class, String::from(name))).copied()
    }

    fn register(&mut self, element: Element) -> u32 {
        let minor = self.next_minor;
        self.next_minor += 1;
        self.by_name
            .insert((element.class, element.name.clone()), minor);
        self.by_fundle.insert(element.fundle, minor);
        self.by_minor.insert(minor, element);
        minor
    }

    fn unregister(&mut self, minor: u32) -> Option<Element> {
        let element = self.by_minor.remove(&minor)?;
        self.by_name.remove(&(element.class, element.name.clone()));
        self.by_fundle.remove(&element.fundle);
        Some(element)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_minor.len()
    }
}

fn read_arg<T: Pod>(arg: &[u8]) -> Result<T> {
    let bytes = arg.get(..size_of::<T>()).ok_or(Error::InvalidArgument)?;
    bytemuck::try_pod_read_unaligned(bytes).map_err(|_| Error::InvalidArgument)
}

fn write_arg<T: Pod>(arg: &mut [u8], value: &T) -> Result<()> {
    let bytes = bytemuck::bytes_of(value);
    arg.get_mut(..bytes.len())
        .ok_or(Error::InvalidArgument)?
        .copy_from_slice(bytes);
    Ok(())
}

fn decode_timeout(timeout: &evl_api::TimeSpec, mode: u32) -> Result<(Timeout, TimeoutMode)> {
    if !timeout.is_valid() {
        return Err(Error::InvalidArgument);
    }
    let mode = TimeoutMode::from_raw(mode).ok_or(Error::InvalidArgument)?;
    Ok((Timeout::from(*timeout), mode))
}

fn decode_protocol(protocol: u32, ceiling: u32) -> Result<MutexProtocol> {
    match protocol {
        PROTO_PI => Ok(MutexProtocol::Inherit),
        PROTO_PP => {
            let ceiling = i32::try_from(ceiling).map_err(|_| Error::InvalidArgument)?;
            Ok(MutexProtocol::Protect { ceiling })
        }
        _ => Err(Error::InvalidArgument),
    }
}

impl Core {
    /// Creates a named element of `class` from its attribute block
    ///
    /// Threads are not factory elements; use
    /// [`create_thread`](Core::create_thread) instead.
    pub fn clone_element(&mut self, class: ElementClass, name: &str, attrs: &[u8]) -> Result<ElementIds> {
        self.check_running()?;
        if class == ElementClass::Thread {
            return Err(Error::NotSupported);
        }
        if name.is_empty() {
            return Err(Error::InvalidArgument);
        }
        if self.elements.lookup(class, name).is_some() {
            return Err(Error::Exists);
        }

        let (object, state) = match class {
            ElementClass::Mutex => {
                let attrs: MutexAttrs = read_arg(attrs)?;
                let clock = ClockId::from_raw(attrs.clockfd)?;
                let protocol = decode_protocol(attrs.protocol, attrs.ceiling)?;
                let m = self.create_mutex(protocol, clock)?;
                let state = self.mutexes[m].block.unwrap_or(self.mutexes[m].fastlock);
                (ElementObject::Mutex(m), state)
            }
            ElementClass::Semaphore => {
                let attrs: SemAttrs = read_arg(attrs)?;
                let clock = ClockId::from_raw(attrs.clockfd)?;
                let flags = SemFlags::from_bits(attrs.flags).ok_or(Error::InvalidArgument)?;
                let s = self.create_semaphore(attrs.initval, flags, clock)?;
                (ElementObject::Semaphore(s), self.semaphores[s].state)
            }
            ElementClass::Monitor => {
                let attrs: MonitorAttrs = read_arg(attrs)?;
                let clock = ClockId::from_raw(attrs.clockfd)?;
                let mon = match attrs.kind {
                    MONITOR_GATE => {
                        let protocol = decode_protocol(attrs.protocol, attrs.initval)?;
                        self.create_gate(protocol, clock)?
                    }
                    MONITOR_EVENT => self.create_event(clock)?,
                    _ => return Err(Error::InvalidArgument),
                };
                (ElementObject::Monitor(mon), self.monitors[mon].state)
            }
            ElementClass::Thread => return Err(Error::NotSupported),
        };

        let fundle = self.alloc_fundle();
        let minor = self.elements.register(Element {
            class,
            name: String::from(name),
            fundle,
            object,
            state,
        });
        evl_debug!("evl: element {}/{} created, minor {}", class.name(), name, minor);
        Ok(ElementIds {
            minor,
            fundle,
            state_offset: state.bytes(),
            __pad: 0,
        })
    }

    /// Looks up an existing element by name
    pub fn bind_element(&self, class: ElementClass, name: &str) -> Result<ElementIds> {
        let minor = self.elements.lookup(class, name).ok_or(Error::NotFound)?;
        self.element_ids(minor)
    }

    pub fn element(&self, minor: u32) -> Result<&Element> {
        self.elements.by_minor.get(&minor).ok_or(Error::NotFound)
    }

    pub fn nr_elements(&self) -> usize {
        self.elements.len()
    }

    fn element_ids(&self, minor: u32) -> Result<ElementIds> {
        let element = self.element(minor)?;
        Ok(ElementIds {
            minor,
            fundle: element.fundle,
            state_offset: element.state.bytes(),
            __pad: 0,
        })
    }

    /// Deletes an element and the object behind it
    pub fn destroy_element(&mut self, minor: u32) -> Result<()> {
        let element = self.elements.unregister(minor).ok_or(Error::NotFound)?;
        match element.object {
            ElementObject::Mutex(m) => self.destroy_mutex(m),
            ElementObject::Semaphore(s) => self.destroy_semaphore(s),
            ElementObject::Monitor(mon) => self.destroy_monitor(mon),
        }
    }

    /// Runs an out-of-band request on element `minor` for `caller`
    ///
    /// `arg` holds the request structure of `op`, if any, and receives the
    /// reply in place. A monitor WAIT reports the synchronous status of the
    /// wait in [`WaitReq::status`] rather than as an error.
    pub fn oob_ioctl(&mut self, minor: u32, caller: ThreadId, op: u32, arg: &mut [u8]) -> Result<Outcome> {
        let object = self.element(minor)?.object;
        match object {
            ElementObject::Mutex(m) => self.mutex_ioctl(minor, m, caller, op, arg),
            ElementObject::Semaphore(s) => self.sem_ioctl(minor, s, caller, op, arg),
            ElementObject::Monitor(mon) => self.monitor_ioctl(minor, mon, caller, op, arg),
        }
    }

    fn mutex_ioctl(&mut self, minor: u32, m: MutexId, caller: ThreadId, op: u32, arg: &mut [u8]) -> Result<Outcome> {
        match op {
            mutex_ioc::LOCK => {
                let req: LockReq = read_arg(arg)?;
                let (timeout, mode) = decode_timeout(&req.timeout, req.mode)?;
                self.mutex_lock(m, caller, timeout, mode)
            }
            mutex_ioc::TRYLOCK => self.mutex_trylock(m, caller).map(|()| Outcome::Completed),
            mutex_ioc::UNLOCK => self.mutex_unlock(m, caller).map(|()| Outcome::Completed),
            mutex_ioc::BIND => self.reply_ids(minor, arg),
            _ => Err(Error::NotSupported),
        }
    }

    fn sem_ioctl(&mut self, minor: u32, s: SemId, caller: ThreadId, op: u32, arg: &mut [u8]) -> Result<Outcome> {
        match op {
            sem_ioc::GET => {
                let req: LockReq = read_arg(arg)?;
                let (timeout, mode) = decode_timeout(&req.timeout, req.mode)?;
                self.sem_down(s, caller, timeout, mode)
            }
            sem_ioc::TRYGET => self.sem_trydown(s, caller).map(|()| Outcome::Completed),
            sem_ioc::PUT => self.sem_up(s).map(|()| Outcome::Completed),
            sem_ioc::BROADCAST => self.sem_broadcast(s).map(|_| Outcome::Completed),
            sem_ioc::BIND => self.reply_ids(minor, arg),
            _ => Err(Error::NotSupported),
        }
    }

    fn monitor_ioctl(
        &mut self,
        minor: u32,
        mon: MonitorId,
        caller: ThreadId,
        op: u32,
        arg: &mut [u8],
    ) -> Result<Outcome> {
        match op {
            monitor_ioc::ENTER => {
                let req: LockReq = read_arg(arg)?;
                let (timeout, mode) = decode_timeout(&req.timeout, req.mode)?;
                self.monitor_enter(mon, caller, timeout, mode)
            }
            monitor_ioc::TRYENTER => self.monitor_tryenter(mon, caller).map(|()| Outcome::Completed),
            monitor_ioc::EXIT => self.monitor_exit(mon, caller).map(|()| Outcome::Completed),
            monitor_ioc::WAIT => {
                let mut req: WaitReq = read_arg(arg)?;
                let (timeout, mode) = decode_timeout(&req.timeout, req.mode)?;
                let gate = self.gate_by_fd(req.gatefd)?;
                let (status, outcome) = match self.monitor_wait(mon, caller, gate, timeout, mode) {
                    Ok(outcome) => (0, outcome),
                    Err(e) if e.is_wait_outcome() => (-e.errno(), Outcome::Completed),
                    Err(e) => return Err(e),
                };
                req.status = status;
                write_arg(arg, &req)?;
                Ok(outcome)
            }
            monitor_ioc::UNWAIT => {
                let req: UnwaitReq = read_arg(arg)?;
                let gate = self.gate_by_fd(req.gatefd)?;
                self.monitor_unwait(gate, caller)
            }
            monitor_ioc::SIGNAL => {
                let req: SignalReq = read_arg(arg)?;
                let target = match req.target {
                    NO_HANDLE => None,
                    fundle => Some(self.thread_by_handle(fundle)?),
                };
                let broadcast = req.flags & SIGNAL_BROADCAST != 0;
                self.monitor_signal(mon, target, broadcast)
                    .map(|()| Outcome::Completed)
            }
            monitor_ioc::BIND => self.reply_ids(minor, arg),
            _ => Err(Error::NotSupported),
        }
    }

    fn reply_ids(&self, minor: u32, arg: &mut [u8]) -> Result<Outcome> {
        let ids = self.element_ids(minor)?;
        write_arg(arg, &ids)?;
        Ok(Outcome::Completed)
    }

    /// Resolves the gate named by a request, -1 meaning none
    fn gate_by_fd(&self, gatefd: i32) -> Result<Option<MonitorId>> {
        if gatefd < 0 {
            return Ok(None);
        }
        match self.element(gatefd as u32)?.object {
            ElementObject::Monitor(mon) if self.monitor(mon)?.is_gate() => Ok(Some(mon)),
            _ => Err(Error::InvalidArgument),
        }
    }
}
