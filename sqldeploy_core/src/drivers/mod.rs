use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "tiberius")] {
        pub mod tiberius;
    }
}
