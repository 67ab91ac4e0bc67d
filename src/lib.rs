//! # benchflow - Flow Interpreter for Bench Instruments
//!
//! **benchflow** runs the dataflow programs ("flows") that automate a bench power
//! supply. A flow is a graph of components wired by connections; components read
//! their configuration from small bytecode expressions and may suspend across
//! scheduler ticks while a slow instrument transaction completes elsewhere.
//!
//! ## Core Workflow
//!
//! 1.  **Load a Definition**: Build a [`FlowDefinition`](asset::FlowDefinition) in code with the
//!     [`asset`] builders, or load a compiled asset from disk (bincode or JSON).
//! 2.  **Build a Runtime**: Use [`Runtime::builder`](runtime::Runtime::builder) to attach hooks, an
//!     SCPI dispatcher and any host-implemented component types.
//! 3.  **Tick**: Call [`Runtime::tick`](runtime::Runtime::tick) from your main loop. Each tick runs
//!     queued work for at most the configured budget (20 ms by default).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use benchflow::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut definition = DefinitionBuilder::new();
//!     let greeting = definition.constant("hello");
//!
//!     let mut flow = FlowBuilder::new("main");
//!     let log_trigger = flow.seq_input();
//!     let start = flow.component(Component::new(ComponentType::Start));
//!     let log = flow.component(
//!         Component::new(ComponentType::Log)
//!             .with_inputs(&[log_trigger])
//!             .with_property(Assembler::new().constant(greeting).finish()),
//!     );
//!     flow.connect(start, SEQOUT, log, log_trigger);
//!     definition.flow(flow.build());
//!
//!     let mut runtime = Runtime::builder(Arc::new(definition.build())).build()?;
//!     runtime.start()?;
//!     while !runtime.queue().is_empty() {
//!         runtime.tick();
//!     }
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod bytecode;
pub mod components;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod prelude;
pub mod runtime;
pub mod scpi;
pub mod value;
