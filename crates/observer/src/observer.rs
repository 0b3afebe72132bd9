use std::slice;
use std::collections::HashMap;

use log::{trace, warn};
use spyglass_encoder::{
    Command, GroupId, Message, Object, Observation, Resource, ResourceRef, TypeDefinition, Value,
};
use spyglass_interval::{Interval, IntervalList, MERGE_THRESHOLD};
use spyglass_memory::{Address, PoolId, ScratchArena, Slice};

use crate::{current_thread_id, ApiIndex, ObserverHost};

/// Context of one in-flight intercepted call.
///
/// Created by the entry trampoline and dropped when the call returns. It
/// accumulates the application memory the call touches, keeps the stack of
/// open trace groups and hands out back-reference ids for objects encoded
/// while servicing the call.
pub struct CallObserver<'a> {
    host: &'a dyn ObserverHost,
    parent: Option<&'a CallObserver<'a>>,
    api: ApiIndex,
    command: &'static str,
    thread: u64,
    should_trace: bool,
    groups: Vec<GroupId>,
    // Depth of `groups` once the call's own command group is open.
    command_depth: Option<usize>,
    backrefs: HashMap<u64, u64>,
    pending: IntervalList<u64>,
    scratch: ScratchArena,
}

impl<'a> CallObserver<'a> {
    pub fn new(host: &'a dyn ObserverHost, api: ApiIndex, command: &'static str) -> Self {
        let should_trace = host.should_trace(api);
        trace!("{} entered (tracing: {})", command, should_trace);

        Self {
            host,
            parent: None,
            api,
            command,
            thread: current_thread_id(),
            should_trace,
            groups: Vec::new(),
            command_depth: None,
            backrefs: HashMap::new(),
            pending: IntervalList::new(MERGE_THRESHOLD),
            scratch: ScratchArena::default(),
        }
    }

    /// An observer for a call made by the spy while servicing this one. Its
    /// records nest under this call's current group.
    pub fn child<'b>(&'b self, command: &'static str) -> CallObserver<'b>
    where
        'a: 'b,
    {
        CallObserver {
            host: self.host,
            parent: Some(self),
            api: self.api,
            command,
            thread: self.thread,
            should_trace: self.should_trace,
            groups: self.groups.last().copied().into_iter().collect(),
            command_depth: None,
            backrefs: HashMap::new(),
            pending: IntervalList::new(MERGE_THRESHOLD),
            scratch: ScratchArena::with_capacity(0),
        }
    }

    pub fn host(&self) -> &'a dyn ObserverHost {
        self.host
    }

    pub fn parent(&self) -> Option<&'a CallObserver<'a>> {
        self.parent
    }

    pub fn api(&self) -> ApiIndex {
        self.api
    }

    pub fn command_name(&self) -> &'static str {
        self.command
    }

    pub fn thread(&self) -> u64 {
        self.thread
    }

    pub fn is_tracing(&self) -> bool {
        self.should_trace
    }

    pub fn scratch(&mut self) -> &mut ScratchArena {
        &mut self.scratch
    }

    /// Records `[base, base + size)` of application memory as read by the call.
    ///
    /// # Safety
    /// The range must stay readable until the next [`CallObserver::observe_pending`].
    pub unsafe fn read(&mut self, base: Address, size: u64) {
        self.touch(base, size);
    }

    /// Records `[base, base + size)` of application memory as written by the call.
    ///
    /// # Safety
    /// The range must stay readable until the next [`CallObserver::observe_pending`].
    pub unsafe fn write(&mut self, base: Address, size: u64) {
        self.touch(base, size);
    }

    /// Records a slice as read. Slices outside the application pool are never
    /// observed.
    pub fn read_slice<T>(&mut self, slice: &Slice<T>) {
        if slice.is_application() {
            self.touch(slice.base(), slice.byte_size());
        }
    }

    pub fn write_slice<T>(&mut self, slice: &Slice<T>) {
        if slice.is_application() {
            self.touch(slice.base(), slice.byte_size());
        }
    }

    fn touch(&mut self, base: Address, size: u64) {
        if !self.should_trace || size == 0 || base.is_null() {
            return;
        }

        self.pending.merge(Interval::from_base_size(base.as_u64(), size));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    /// Emits one observation per merged pending interval and clears the list.
    pub fn observe_pending(&mut self) {
        for interval in self.pending.take() {
            let size = interval.end - interval.start;
            // Ranges enter the list through `read`/`write`, whose callers
            // guarantee they are readable until now.
            let data = unsafe { slice::from_raw_parts(interval.start as usize as *const u8, size as usize) };
            self.observe_bytes(PoolId::APPLICATION, Address::from(interval.start), data);
        }
    }

    /// Emits an observation of `data` as the contents of `[base, base + len)` in `pool`.
    pub fn observe_bytes(&mut self, pool: PoolId, base: Address, data: &[u8]) {
        if !self.should_trace || data.is_empty() {
            return;
        }

        let host = self.host;
        let group = self.current_group();
        let (id, _, is_new) = host.resources().intern(data, |id, hash| {
            host.encoder().object(group, Message::Resource(Resource { id, hash, data: data.to_vec() }));
        });
        let resource = if is_new { ResourceRef(id as i64) } else { ResourceRef(-(id as i64)) };

        self.encode(Message::Observation(Observation {
            pool: pool.0,
            base: base.as_u64(),
            size: data.len() as u64,
            resource,
        }));
    }

    /// Back-reference id for an object address, and whether it is new.
    /// Null is id 0 and never new.
    pub fn reference_id(&mut self, address: u64) -> (u64, bool) {
        if address == 0 {
            return (0, false);
        }

        let next = self.backrefs.len() as u64 + 1;
        match self.backrefs.get(&address) {
            Some(id) => (*id, false),
            None => {
                self.backrefs.insert(address, next);
                (next, true)
            },
        }
    }

    /// Positive id for a first definition, the negated id for a repeat.
    pub fn encode_backref(&mut self, address: u64) -> i64 {
        match self.reference_id(address) {
            (id, true) => id as i64,
            (id, false) => -(id as i64),
        }
    }

    /// Type id for `name`, sending its definition the first time.
    /// Returns 0 without assigning an id when the call is not traced.
    pub fn encode_type(&mut self, name: &str) -> i64 {
        if !self.should_trace {
            return 0;
        }

        let host = self.host;
        let group = self.current_group();
        host.types().define(name, |id| {
            host.encoder().object(group, Message::TypeDefinition(TypeDefinition { id, name: name.to_string() }));
        })
    }

    /// Encodes an object instance. Returns its back-reference id; fields are
    /// only sent when the instance is new.
    pub fn encode_object(&mut self, type_name: &str, address: u64, fields: Vec<(String, Value)>) -> i64 {
        if !self.should_trace {
            return 0;
        }

        let type_id = self.encode_type(type_name);
        let backref = self.encode_backref(address);
        let fields = if backref > 0 { fields } else { Vec::new() };

        self.encode(Message::Object(Object { type_id, backref, fields }));
        backref
    }

    fn current_group(&self) -> Option<GroupId> {
        self.groups.last().copied()
    }

    /// Opens a group; records emitted until the matching [`CallObserver::exit`] nest under it.
    pub fn enter(&mut self, message: Message) {
        if !self.should_trace {
            return;
        }

        let id = self.host.encoder().group(self.current_group(), message);
        self.groups.push(id);
    }

    pub fn exit(&mut self) {
        if !self.should_trace {
            return;
        }

        let popped = self.groups.pop();
        debug_assert!(popped.is_some(), "exit without a matching enter");
    }

    /// Emits a leaf record in the current group.
    pub fn encode(&mut self, message: Message) {
        if !self.should_trace {
            return;
        }

        self.host.encoder().object(self.current_group(), message);
    }

    /// Opens the group for this call's command.
    pub fn command(&mut self, args: Vec<Value>) {
        if !self.should_trace || self.command_depth.is_some() {
            return;
        }

        self.enter(Message::Command(Command {
            api: self.api.0,
            name: self.command.to_string(),
            thread: self.thread,
            args,
        }));
        self.command_depth = Some(self.groups.len());
    }

    pub fn encode_return(&mut self, value: Value) {
        self.encode(Message::Return(value));
    }

    /// Re-checks after the driver call whether this call is still traced.
    ///
    /// Another thread may have closed the capture window while this call was
    /// blocked in the driver. When that happens the command group opened at
    /// entry is dropped and nothing further is observed.
    pub fn resume(&mut self) {
        if !self.should_trace || self.host.should_trace(self.api) {
            return;
        }

        trace!("{} lost tracing while in the driver", self.command);
        if let Some(depth) = self.command_depth.take() {
            self.groups.truncate(depth - 1);
        }
        self.pending.clear();
        self.should_trace = false;
    }

    pub fn on_pre_start_of_frame(&self) {
        self.host.on_pre_start_of_frame(self.api);
    }

    pub fn on_post_end_of_frame(&self) {
        self.host.on_post_end_of_frame(self.api);
    }

    pub fn on_draw(&self) -> bool {
        self.host.on_draw(self.api)
    }

    pub fn should_observe_frame(&self) -> bool {
        self.host.should_observe_frame(self.api)
    }

    pub fn allocate_pool(&self) -> PoolId {
        self.host.allocate_pool()
    }

    pub fn record_error_state(&self) -> bool {
        self.host.record_error_state()
    }

    pub fn track_coherent_memory(&self) -> bool {
        self.host.track_coherent_memory()
    }
}

impl Drop for CallObserver<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "{} finished with {} unobserved ranges",
                self.command,
                self.pending.count()
            );
            debug_assert!(std::thread::panicking(), "pending observations were never flushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::sync::Barrier;
    use std::time::Duration;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use spyglass_encoder::{Encoder, GroupId, MemoryEncoder, Message, TypeTable, Value};
    use spyglass_memory::{Address, PoolId, Slice, ScratchArena};

    use crate::{ApiIndex, CallObserver, ObserverHost, ResourceStore};

    struct TestHost {
        encoder: MemoryEncoder,
        resources: ResourceStore,
        types: TypeTable,
        tracing: AtomicBool,
        pools: AtomicU32,
    }

    impl TestHost {
        fn new(tracing: bool) -> Self {
            Self {
                encoder: MemoryEncoder::new(),
                resources: ResourceStore::new(),
                types: TypeTable::default(),
                tracing: AtomicBool::new(tracing),
                pools: AtomicU32::new(0),
            }
        }

        fn observations(&self) -> Vec<(u64, u64, i64)> {
            self.encoder.messages().into_iter()
                .filter_map(|m| match m {
                    Message::Observation(o) => Some((o.base, o.size, o.resource.0)),
                    _ => None,
                })
                .collect()
        }

        fn resource_count(&self) -> usize {
            self.encoder.messages().iter()
                .filter(|m| matches!(m, Message::Resource(_)))
                .count()
        }
    }

    impl ObserverHost for TestHost {
        fn encoder(&self) -> &dyn Encoder {
            &self.encoder
        }

        fn resources(&self) -> &ResourceStore {
            &self.resources
        }

        fn types(&self) -> &TypeTable {
            &self.types
        }

        fn allocate_pool(&self) -> PoolId {
            PoolId(self.pools.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn should_trace(&self, _: ApiIndex) -> bool {
            self.tracing.load(Ordering::SeqCst)
        }
    }

    // Holds up every definition record so a second thread has time to race it.
    struct SlowDefinitions {
        inner: MemoryEncoder,
    }

    impl Encoder for SlowDefinitions {
        fn object(&self, parent: Option<GroupId>, message: Message) {
            if matches!(message, Message::Resource(_) | Message::TypeDefinition(_)) {
                thread::sleep(Duration::from_millis(20));
            }
            self.inner.object(parent, message);
        }

        fn group(&self, parent: Option<GroupId>, message: Message) -> GroupId {
            self.inner.group(parent, message)
        }
    }

    struct SlowHost {
        encoder: SlowDefinitions,
        base: TestHost,
    }

    impl SlowHost {
        fn new() -> Self {
            Self {
                encoder: SlowDefinitions { inner: MemoryEncoder::new() },
                base: TestHost::new(true),
            }
        }
    }

    impl ObserverHost for SlowHost {
        fn encoder(&self) -> &dyn Encoder {
            &self.encoder
        }

        fn resources(&self) -> &ResourceStore {
            &self.base.resources
        }

        fn types(&self) -> &TypeTable {
            &self.base.types
        }

        fn allocate_pool(&self) -> PoolId {
            self.base.allocate_pool()
        }

        fn should_trace(&self, _: ApiIndex) -> bool {
            true
        }
    }

    #[test]
    fn nearby_reads_become_one_observation() {
        let host = TestHost::new(true);
        let data = vec![3u8; 600];
        let base = Address::from_ptr(data.as_ptr());

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glBufferData");
        unsafe {
            observer.read(base, 10);
            observer.read(base.offset(100), 10);
            observer.read(base.offset(500), 100);
        }
        observer.observe_pending();

        assert_eq!(host.observations(), vec![(base.as_u64(), 600, 1)]);
    }

    #[test]
    fn observing_clears_the_pending_list() {
        let host = TestHost::new(true);
        let data = vec![1u8; 16];

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glBufferSubData");
        unsafe { observer.read(Address::from_ptr(data.as_ptr()), 16) };
        observer.observe_pending();
        assert_eq!(observer.pending_count(), 0);

        observer.observe_pending();
        assert_eq!(host.observations().len(), 1);
    }

    #[test]
    fn identical_contents_are_sent_once() {
        let host = TestHost::new(true);
        let first = vec![0xabu8; 32];
        let second = vec![0xabu8; 32];

        let mut observer = CallObserver::new(&host, ApiIndex::VULKAN, "vkCmdUpdateBuffer");
        unsafe { observer.write(Address::from_ptr(first.as_ptr()), 32) };
        observer.observe_pending();
        drop(observer);

        let mut observer = CallObserver::new(&host, ApiIndex::VULKAN, "vkCmdUpdateBuffer");
        unsafe { observer.write(Address::from_ptr(second.as_ptr()), 32) };
        observer.observe_pending();

        let observations = host.observations();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].2, 1);
        assert_eq!(observations[1].2, -1);
        assert_ne!(observations[0].0, observations[1].0);
        assert_eq!(host.resource_count(), 1);
    }

    #[test]
    fn nothing_is_observed_while_suspended() {
        let host = TestHost::new(false);
        let data = vec![1u8; 16];

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glTexImage2D");
        unsafe { observer.read(Address::from_ptr(data.as_ptr()), 16) };
        observer.command(vec![Value::U32(1)]);
        observer.observe_pending();

        assert_eq!(observer.pending_count(), 0);
        assert!(host.encoder.is_empty());
    }

    #[test]
    fn zero_sized_and_null_reads_are_ignored() {
        let host = TestHost::new(true);
        let data = vec![1u8; 16];

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glBufferData");
        unsafe {
            observer.read(Address::from_ptr(data.as_ptr()), 0);
            observer.read(Address::NULL, 64);
        }

        assert_eq!(observer.pending_count(), 0);
    }

    #[test]
    fn scratch_slices_are_never_observed() {
        let host = TestHost::new(true);
        let mut arena = ScratchArena::with_capacity(64);
        let buffer = arena.alloc_copy(&[5u8; 8]);

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glReadPixels");
        observer.write_slice(&buffer.slice());

        assert_eq!(observer.pending_count(), 0);

        let data = vec![9u32; 4];
        let slice = unsafe { Slice::from_app_ptr(data.as_ptr(), 4) };
        observer.read_slice(&slice);
        assert_eq!(observer.pending_count(), 1);
        observer.observe_pending();
    }

    #[test]
    fn back_references_are_stable() {
        let host = TestHost::new(true);
        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glDrawArrays");

        assert_eq!(observer.reference_id(0x1000), (1, true));
        assert_eq!(observer.reference_id(0x2000), (2, true));
        assert_eq!(observer.reference_id(0x1000), (1, false));
        assert_eq!(observer.reference_id(0), (0, false));
        assert_eq!(observer.encode_backref(0x2000), -2);
        assert_eq!(observer.encode_backref(0x3000), 3);
    }

    #[test]
    fn objects_are_defined_once_then_referenced() {
        let host = TestHost::new(true);
        let mut observer = CallObserver::new(&host, ApiIndex::VULKAN, "vkQueueSubmit");

        let first = observer.encode_object("VkSubmitInfo", 0x40, vec![("count".to_string(), Value::U32(1))]);
        let second = observer.encode_object("VkSubmitInfo", 0x40, vec![("count".to_string(), Value::U32(1))]);

        assert_eq!(first, 1);
        assert_eq!(second, -1);

        let messages = host.encoder.messages();
        let types = messages.iter().filter(|m| matches!(m, Message::TypeDefinition(_))).count();
        assert_eq!(types, 1);
        match &messages[messages.len() - 1] {
            Message::Object(o) => {
                assert_eq!(o.type_id, -1);
                assert!(o.fields.is_empty());
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn records_nest_under_the_command() {
        let host = TestHost::new(true);
        let data = vec![2u8; 8];

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glBufferData");
        observer.command(vec![Value::U32(0x8892)]);
        unsafe { observer.read(Address::from_ptr(data.as_ptr()), 8) };
        observer.observe_pending();
        observer.encode_return(Value::Null);

        let records = host.encoder.records();
        assert!(records[0].group);
        assert!(records[1..].iter().all(|r| r.parent == Some(records[0].id)));
    }

    #[test]
    fn children_nest_under_their_parent() {
        let host = TestHost::new(true);
        let mut parent = CallObserver::new(&host, ApiIndex::GLES, "eglSwapBuffers");
        parent.command(vec![]);

        {
            let mut child = parent.child("glReadPixels");
            child.command(vec![]);
            child.encode_return(Value::Null);
            assert_eq!(child.parent().map(|p| p.command_name()), Some("eglSwapBuffers"));
        }

        let records = host.encoder.records();
        assert_eq!(records[1].parent, Some(records[0].id));
        assert_eq!(records[2].parent, Some(records[1].id));
    }

    #[test]
    fn resume_drops_the_command_when_tracing_ends_mid_call() {
        let host = TestHost::new(true);
        let data = vec![2u8; 8];

        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glFinish");
        observer.command(vec![]);
        unsafe { observer.write(Address::from_ptr(data.as_ptr()), 8) };

        host.tracing.store(false, Ordering::SeqCst);
        observer.resume();
        observer.observe_pending();
        observer.encode_return(Value::Null);

        assert!(!observer.is_tracing());
        assert_eq!(host.encoder.len(), 1);
    }

    #[test]
    fn injected_bytes_carry_their_pool() {
        let host = TestHost::new(true);
        let mut observer = CallObserver::new(&host, ApiIndex::VULKAN, "state");
        observer.observe_bytes(PoolId(12), Address::from(0x100u64), &[1, 2, 3]);

        match &host.encoder.messages()[1] {
            Message::Observation(o) => {
                assert_eq!(o.pool, 12);
                assert_eq!(o.base, 0x100);
                assert_eq!(o.size, 3);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn racing_observers_see_the_resource_before_its_reference() {
        let host = SlowHost::new();
        let barrier = Barrier::new(4);
        let data = vec![7u8; 64];

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut observer = CallObserver::new(&host, ApiIndex::VULKAN, "vkCmdUpdateBuffer");
                    barrier.wait();
                    observer.observe_bytes(PoolId::APPLICATION, Address::from_ptr(data.as_ptr()), &data);
                });
            }
        });

        let messages = host.encoder.inner.messages();
        let defined = messages.iter().position(|m| matches!(m, Message::Resource(_)));
        let first_reference = messages.iter().position(|m| matches!(m, Message::Observation(o) if o.resource.0 < 0));

        assert_eq!(messages.iter().filter(|m| matches!(m, Message::Resource(_))).count(), 1);
        assert_eq!(messages.iter().filter(|m| matches!(m, Message::Observation(_))).count(), 4);
        assert!(defined < first_reference);
    }

    #[test]
    fn racing_observers_see_the_type_before_its_reference() {
        let host = SlowHost::new();
        let barrier = Barrier::new(4);

        thread::scope(|scope| {
            for address in 1..=4u64 {
                let barrier = &barrier;
                let host = &host;
                scope.spawn(move || {
                    let mut observer = CallObserver::new(host, ApiIndex::VULKAN, "vkCreateBuffer");
                    barrier.wait();
                    observer.encode_object("VkBufferCreateInfo", address * 0x100, vec![]);
                });
            }
        });

        let messages = host.encoder.inner.messages();
        let defined = messages.iter().position(|m| matches!(m, Message::TypeDefinition(_)));
        let first_reference = messages.iter().position(|m| matches!(m, Message::Object(o) if o.type_id < 0));

        assert_eq!(messages.iter().filter(|m| matches!(m, Message::TypeDefinition(_))).count(), 1);
        assert!(defined.is_some());
        assert!(defined < first_reference);
    }

    #[test]
    fn untraced_types_are_defined_when_first_traced() {
        let host = TestHost::new(false);
        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glGenTextures");
        assert_eq!(observer.encode_type("Texture"), 0);
        drop(observer);
        assert!(host.encoder.is_empty());

        host.tracing.store(true, Ordering::SeqCst);
        let mut observer = CallObserver::new(&host, ApiIndex::GLES, "glBindTexture");
        assert_eq!(observer.encode_type("Texture"), 1);

        match &host.encoder.messages()[..] {
            [Message::TypeDefinition(t)] => {
                assert_eq!(t.id, 1);
                assert_eq!(t.name, "Texture");
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
