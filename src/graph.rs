// graph.rs — Kernel registry and the per-call dependency graph.
//
// Two layers:
//
//   KernelRegistry  built once. Maps program names to one of
//                     Plain     — one kernel, fresh output buffer per call
//                     PingPong  — one kernel, two physical buffers used in
//                                 alternation across invocations
//                     Composed  — `second(first(args), args[1..])`
//
//   KernelGraph     built per detection call. `run` records a node and
//                   returns a handle immediately; nothing executes until
//                   `download` (the only await point) asks for a handle.
//                   Only the not-yet-executed ancestors of that handle run.
//
// Nodes can only reference earlier nodes, so record order is already a
// topological order: executing the pending ancestor set in ascending index
// order respects every producer → consumer edge.
//
// PING-PONG HAZARDS
// ─────────────────
// Invocation k of a ping-pong program writes physical buffer k mod 2. Each
// buffer remembers which node's output it currently holds. Reading a node
// whose buffer has since been overwritten by a later invocation of the same
// program is a programming error and panics, as does recording an
// invocation that reads the very buffer it is about to overwrite.
//
// NEW RUST CONCEPTS:
// - `async fn` on a synchronous executor — `download` is awaitable so GPU
//   readback can later become truly asynchronous without changing callers.
// - `std::mem::take` to move an output buffer out of its slot while the
//   input slots stay borrowed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::kernel::{Input, Kernel, Param};
use crate::texture::Texture;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Program {
    Plain(Arc<dyn Kernel>),
    PingPong(Arc<dyn Kernel>),
    Composed { first: String, second: String },
}

/// Named kernel programs, built once at initialisation.
#[derive(Clone, Default)]
pub struct KernelRegistry {
    programs: HashMap<String, Program>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kernel whose every invocation gets its own output buffer.
    /// Redeclaring a name replaces the previous program.
    pub fn declare(&mut self, name: &str, kernel: impl Kernel + 'static) {
        self.programs.insert(name.to_string(), Program::Plain(Arc::new(kernel)));
    }

    /// Register an iterative kernel run over two alternating buffers.
    pub fn declare_pingpong(&mut self, name: &str, kernel: impl Kernel + 'static) {
        self.programs.insert(name.to_string(), Program::PingPong(Arc::new(kernel)));
    }

    /// Register `name` as `second(first(args), args[1..])`.
    ///
    /// # Panics
    /// Panics if either program is unknown, or if `second`'s parameter list
    /// is not a texture followed by `first`'s trailing parameters.
    pub fn compose(&mut self, name: &str, first: &str, second: &str) {
        let p1 = self.params(first);
        let p2 = self.params(second);
        assert!(
            !p1.is_empty() && p2.first() == Some(&Param::Texture) && p2[1..] == p1[1..],
            "cannot compose '{second}' after '{first}': incompatible parameter lists"
        );
        self.programs.insert(
            name.to_string(),
            Program::Composed { first: first.to_string(), second: second.to_string() },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    /// Parameter list of a program. Composed programs take the parameters
    /// of their first stage.
    ///
    /// # Panics
    /// Panics if `name` is not registered.
    pub fn params(&self, name: &str) -> Vec<Param> {
        match self.program(name) {
            Program::Plain(k) | Program::PingPong(k) => k.params().to_vec(),
            Program::Composed { first, .. } => self.params(first),
        }
    }

    /// Registered names, sorted. Handy for logging.
    pub fn names(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.programs.keys().map(|s| s.as_str()).collect();
        v.sort_unstable();
        v
    }

    fn program(&self, name: &str) -> &Program {
        self.programs
            .get(name)
            .unwrap_or_else(|| panic!("unknown kernel program '{name}'"))
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// Logical handle to a node's output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    index: usize,
    epoch: u32,
}

/// An argument as recorded in the graph.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    Buffer(BufferHandle),
    Float(f32),
    Int(i64),
}

impl From<BufferHandle> for Arg {
    fn from(h: BufferHandle) -> Self { Arg::Buffer(h) }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self { Arg::Float(v) }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self { Arg::Int(v) }
}

impl From<usize> for Arg {
    fn from(v: usize) -> Self { Arg::Int(v as i64) }
}

enum Op {
    Input,
    Kernel {
        name: String,
        kernel: Arc<dyn Kernel>,
        args: Vec<Arg>,
        size: Option<(usize, usize)>,
    },
}

enum Storage {
    Owned(Texture),
    PingPong { program: String, side: usize },
}

struct Node {
    op: Op,
    storage: Storage,
    executed: bool,
}

/// Two physical buffers plus a toggle bit. `resident[s]` is the node whose
/// output buffer `s` currently holds.
#[derive(Default)]
struct PingPong {
    buffers: [Texture; 2],
    next: usize,
    resident: [Option<usize>; 2],
}

/// Per-call DAG of kernel invocations with a lazy executor.
pub struct KernelGraph {
    registry: Arc<KernelRegistry>,
    nodes: Vec<Node>,
    pingpong: HashMap<String, PingPong>,
    epoch: u32,
}

impl KernelGraph {
    pub fn new(registry: Arc<KernelRegistry>) -> Self {
        KernelGraph { registry, nodes: Vec::new(), pingpong: HashMap::new(), epoch: 0 }
    }

    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    /// Forget every recorded node. Ping-pong buffers keep their
    /// allocations for the next call. Handles from before the reset become
    /// invalid.
    pub fn clear(&mut self) {
        self.nodes.clear();
        for pp in self.pingpong.values_mut() {
            pp.next = 0;
            pp.resident = [None, None];
        }
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the node behind `h` has run.
    pub fn is_executed(&self, h: BufferHandle) -> bool {
        self.check_handle(h);
        self.nodes[h.index].executed
    }

    /// Number of kernel nodes (inputs excluded) that have run.
    pub fn executed_kernels(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.executed && matches!(n.op, Op::Kernel { .. }))
            .count()
    }

    /// Add an externally produced texture.
    pub fn input(&mut self, texture: Texture) -> BufferHandle {
        self.nodes.push(Node { op: Op::Input, storage: Storage::Owned(texture), executed: true });
        self.handle(self.nodes.len() - 1)
    }

    /// Record an invocation with an implicit output size.
    ///
    /// # Panics
    /// Panics on an unknown program, an argument list that does not match
    /// the program's parameters, a stale handle, or a ping-pong invocation
    /// that reads the buffer it would overwrite.
    pub fn run(&mut self, name: &str, args: &[Arg]) -> BufferHandle {
        self.record(name, None, args)
    }

    /// Record an invocation with an explicit output size.
    pub fn run_sized(&mut self, name: &str, size: (usize, usize), args: &[Arg]) -> BufferHandle {
        self.record(name, Some(size), args)
    }

    fn record(&mut self, name: &str, size: Option<(usize, usize)>, args: &[Arg]) -> BufferHandle {
        let registry = Arc::clone(&self.registry);
        match registry.program(name) {
            Program::Composed { first, second } => {
                let h = self.record(first, None, args);
                let mut rest = Vec::with_capacity(args.len());
                rest.push(Arg::Buffer(h));
                rest.extend_from_slice(&args[1..]);
                self.record(second, size, &rest)
            }
            Program::Plain(kernel) => {
                self.check_args(name, kernel.params(), args);
                self.push_kernel(name, kernel, args, size, Storage::Owned(Texture::default()))
            }
            Program::PingPong(kernel) => {
                self.check_args(name, kernel.params(), args);
                let pp = self.pingpong.entry(name.to_string()).or_default();
                let side = pp.next;
                pp.next ^= 1;
                for a in args {
                    if let Arg::Buffer(h) = a {
                        if let Storage::PingPong { program, side: s } = &self.nodes[h.index].storage {
                            assert!(
                                !(program == name && *s == side),
                                "ping-pong program '{name}' would overwrite its own input (node {})",
                                h.index
                            );
                        }
                    }
                }
                let storage = Storage::PingPong { program: name.to_string(), side };
                self.push_kernel(name, kernel, args, size, storage)
            }
        }
    }

    fn push_kernel(
        &mut self,
        name: &str,
        kernel: &Arc<dyn Kernel>,
        args: &[Arg],
        size: Option<(usize, usize)>,
        storage: Storage,
    ) -> BufferHandle {
        self.nodes.push(Node {
            op: Op::Kernel {
                name: name.to_string(),
                kernel: Arc::clone(kernel),
                args: args.to_vec(),
                size,
            },
            storage,
            executed: false,
        });
        self.handle(self.nodes.len() - 1)
    }

    fn check_args(&self, name: &str, params: &[Param], args: &[Arg]) {
        assert_eq!(
            params.len(),
            args.len(),
            "kernel '{name}' takes {} arguments, got {}",
            params.len(),
            args.len()
        );
        for (i, (p, a)) in params.iter().zip(args).enumerate() {
            let ok = match (p, a) {
                (Param::Texture, Arg::Buffer(h)) => {
                    self.check_handle(*h);
                    true
                }
                (Param::Float, Arg::Float(_)) | (Param::Float, Arg::Int(_)) => true,
                (Param::Int, Arg::Int(_)) => true,
                _ => false,
            };
            assert!(ok, "kernel '{name}' argument {i}: expected {p:?}, got {a:?}");
        }
    }

    fn handle(&self, index: usize) -> BufferHandle {
        BufferHandle { index, epoch: self.epoch }
    }

    fn check_handle(&self, h: BufferHandle) {
        assert!(
            h.epoch == self.epoch && h.index < self.nodes.len(),
            "stale or foreign buffer handle {h:?}"
        );
    }

    // ---- Execution ---------------------------------------------------------

    /// Run every pending ancestor of `target` (and `target` itself).
    pub fn execute(&mut self, target: BufferHandle) {
        self.check_handle(target);

        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![target.index];
        while let Some(i) = stack.pop() {
            if !seen.insert(i) || self.nodes[i].executed {
                continue;
            }
            pending.push(i);
            if let Op::Kernel { args, .. } = &self.nodes[i].op {
                stack.extend(args.iter().filter_map(|a| match a {
                    Arg::Buffer(h) => Some(h.index),
                    _ => None,
                }));
            }
        }
        if pending.is_empty() {
            return;
        }
        pending.sort_unstable();
        log::debug!("executing {} pending kernel(s) for node {}", pending.len(), target.index);
        for i in pending {
            self.execute_node(i);
        }
    }

    /// Run everything recorded so far.
    pub fn execute_all(&mut self) {
        for i in 0..self.nodes.len() {
            if !self.nodes[i].executed {
                self.execute_node(i);
            }
        }
    }

    fn execute_node(&mut self, i: usize) {
        let (name, kernel, args, size) = match &self.nodes[i].op {
            Op::Kernel { name, kernel, args, size } => {
                (name.clone(), Arc::clone(kernel), args.clone(), *size)
            }
            Op::Input => {
                self.nodes[i].executed = true;
                return;
            }
        };

        let mut out = match &mut self.nodes[i].storage {
            Storage::Owned(t) => std::mem::take(t),
            Storage::PingPong { program, side } => {
                let side = *side;
                let pp = self.pingpong.entry(program.clone()).or_default();
                std::mem::take(&mut pp.buffers[side])
            }
        };

        {
            let inputs: Vec<Input<'_>> = args
                .iter()
                .map(|a| match a {
                    Arg::Buffer(h) => Input::Texture(self.resolve(*h)),
                    Arg::Float(v) => Input::Float(*v),
                    Arg::Int(v) => Input::Int(*v),
                })
                .collect();
            let (w, h) = size.unwrap_or_else(|| kernel.output_size(&inputs));
            out.reset(w, h);
            log::trace!("kernel '{name}' (node {i}) → {w}×{h}");
            kernel.run(&inputs, &mut out);
        }

        match &mut self.nodes[i].storage {
            Storage::Owned(t) => *t = out,
            Storage::PingPong { program, side } => {
                let side = *side;
                let pp = self.pingpong.entry(program.clone()).or_default();
                pp.buffers[side] = out;
                pp.resident[side] = Some(i);
            }
        }
        self.nodes[i].executed = true;
    }

    fn resolve(&self, h: BufferHandle) -> &Texture {
        let node = &self.nodes[h.index];
        assert!(node.executed, "node {} read before it executed", h.index);
        match &node.storage {
            Storage::Owned(t) => t,
            Storage::PingPong { program, side } => {
                let pp = &self.pingpong[program];
                assert!(
                    pp.resident[*side] == Some(h.index),
                    "ping-pong buffer of '{program}' was overwritten before node {} was read",
                    h.index
                );
                &pp.buffers[*side]
            }
        }
    }

    /// Execute what `h` needs and copy its buffer out. This is the only
    /// suspension point of a detection call.
    pub async fn download(&mut self, h: BufferHandle) -> Texture {
        self.execute(h);
        self.resolve(h).clone()
    }

    /// Blocking form of [`download`](Self::download).
    pub fn read(&mut self, h: BufferHandle) -> Texture {
        pollster::block_on(self.download(h))
    }
}
