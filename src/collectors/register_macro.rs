macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        // Import all collector modules
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        /// Register every built-in collector under its module name.
        ///
        /// # Errors
        ///
        /// Returns `RegistryError::Duplicate` if a name is already taken.
        pub fn register_builtin(
            registry: &mut registry::CollectorRegistry,
        ) -> Result<(), error::RegistryError> {
            $(
                registry.register(
                    stringify!($module),
                    $collector_type::ENABLED_BY_DEFAULT,
                    |span: &tracing::Span| {
                        let collector = $collector_type::new(span)?;
                        Ok(Arc::new(collector) as Arc<dyn Collector>)
                    },
                )?;
            )*
            Ok(())
        }

        // Generate array of collector names
        pub const COLLECTOR_NAMES: &[&'static str] = &[
            $(stringify!($module),)*
        ];
    };
}
