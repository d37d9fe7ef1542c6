//! Cross-crate scenarios: selector resolution feeding the trap dispatcher,
//! and the debugger view of the same tables.

#[cfg(test)]
mod guest;
#[cfg(test)]
mod scenarios;
#[cfg(test)]
mod smoke;
