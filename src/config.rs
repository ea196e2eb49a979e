// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

/// Адрес по умолчанию для сигнального сервера
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9090";

/// Имя участника по умолчанию, если клиент прислал пустое
pub const DEFAULT_DISPLAY_NAME: &str = "guest";

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    // ВАЖНО: Эта настройка работает только в debug режиме!
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    // В продакшене все дополнительные настройки отключены
    pub const ENABLE_LOGGING: bool = false;
}
