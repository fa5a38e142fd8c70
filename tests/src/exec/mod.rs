mod chain;
mod flush;
