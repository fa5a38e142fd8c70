mod code_buffer;
mod reloc;
