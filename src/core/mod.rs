//! Small, context-free numeric helpers shared by the geometry and
//! acceleration-structure modules. Nothing in here allocates or touches a
//! thread-local; every function is a pure transform on its arguments.

pub mod math;
